/// Trailing administrative-unit words dropped from city names.
const ADMIN_SUFFIXES: &[&str] = &["city", "district", "tehsil", "div", "division", "town"];

/// Reduces a user-entered city name to its lookup key.
///
/// Lower-cases, collapses whitespace and strips trailing administrative
/// suffixes as long as another word precedes them, so
/// `"  Lahore  CITY "` and `"lahore"` share a key while `"City"` alone
/// stays `"city"`. Repeated application yields the same key.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();

    while words.len() > 1 {
        match words.last() {
            Some(last) if ADMIN_SUFFIXES.contains(last) => {
                words.pop();
            }
            _ => break,
        }
    }

    words.join(" ")
}

/// Best-effort carrier spelling for a key PostEx has never confirmed.
pub fn guess_carrier_format(normalized_key: &str) -> String {
    normalized_key
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
