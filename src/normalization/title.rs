/// Reduce a product title to a search/match key: Turkish letters folded to
/// their base Latin form, lowercased, everything outside `[a-z0-9]` dropped.
///
/// Not meant for display; the raw title is kept alongside.
pub fn normalize_title(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'ı' | 'İ' | 'î' | 'Î' => 'i',
            'ğ' | 'Ğ' => 'g',
            'ü' | 'Ü' | 'û' | 'Û' => 'u',
            'ş' | 'Ş' => 's',
            'ö' | 'Ö' => 'o',
            'ç' | 'Ç' => 'c',
            'â' | 'Â' => 'a',
            other => other.to_ascii_lowercase(),
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}
