use weather_core::WeatherView;

/// Human-friendly block for a rendered view.
pub fn format_view(view: &WeatherView) -> String {
    let icon = view.icon.map(|i| i.as_str()).unwrap_or("-");

    let mut out = String::new();
    out.push_str(&format!("{}, {}\n", view.name, view.country));
    out.push_str(&format!(
        "  {:<12} {} ({})\n",
        "Condition", view.condition, view.description
    ));
    out.push_str(&format!("  {:<12} {}\n", "Temperature", view.temperature));
    out.push_str(&format!("  {:<12} {} / {}\n", "Range", view.max, view.min));
    out.push_str(&format!("  {:<12} {}\n", "Humidity", view.humidity));
    out.push_str(&format!("  {:<12} {}\n", "Wind", view.wind_speed));
    out.push_str(&format!("  {:<12} {}\n", "Sunrise", view.sunrise));
    out.push_str(&format!("  {:<12} {}\n", "Sunset", view.sunset));
    out.push_str(&format!("  {:<12} {}\n", "Icon", icon));
    out
}
