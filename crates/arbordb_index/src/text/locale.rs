//! Locale-aware case folding.

/// Lower-cases `text` for `locale`.
///
/// Turkish and Azeri map `I` to dotless `ı` and `İ` to `i`; every other
/// locale uses the default Unicode mapping.
pub fn lowercase(text: &str, locale: &str) -> String {
    let language = locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_ascii_lowercase();
    if language == "tr" || language == "az" {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            match ch {
                'I' => out.push('ı'),
                'İ' => out.push('i'),
                other => out.extend(other.to_lowercase()),
            }
        }
        out
    } else {
        text.to_lowercase()
    }
}
