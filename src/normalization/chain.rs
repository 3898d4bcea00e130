/// A marker that, when found anywhere in a market name, identifies a chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainAlias {
    pub marker: &'static str,
    pub code: &'static str,
}

impl ChainAlias {
    pub const fn new(marker: &'static str, code: &'static str) -> Self {
        Self { marker, code }
    }
}

/// Known chains, checked in order; the first matching marker wins.
pub const CHAIN_ALIASES: [ChainAlias; 7] = [
    ChainAlias::new("MİGROS", "MIGROS"),
    ChainAlias::new("A101", "A101"),
    ChainAlias::new("ŞOK", "SOK"),
    ChainAlias::new("BİM", "BIM"),
    ChainAlias::new("BIM", "BIM"),
    ChainAlias::new("CARREFOUR", "CARREFOUR"),
    ChainAlias::new("TARIM KREDİ", "TARIM_KREDİ"),
];

/// Uppercase and fold Turkish letters onto their base Latin capitals so that
/// "Migros", "MİGROS" and "mıgros" all compare equal.
fn fold_upper(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_uppercase)
        .map(|c| match c {
            'İ' => 'I',
            'Ş' => 'S',
            'Ğ' => 'G',
            'Ü' => 'U',
            'Ö' => 'O',
            'Ç' => 'C',
            other => other,
        })
        .collect()
}

/// Map a raw market name to its canonical chain code.
///
/// Matching is a case- and locale-insensitive substring search against
/// `CHAIN_ALIASES`. Names that match nothing are returned uppercased and
/// otherwise untouched.
pub fn normalize_chain(raw: &str) -> String {
    let folded = fold_upper(raw);
    CHAIN_ALIASES
        .iter()
        .find(|alias| folded.contains(&fold_upper(alias.marker)))
        .map(|alias| alias.code.to_string())
        .unwrap_or_else(|| raw.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chains_map_regardless_of_case_and_dotted_i() {
        for (raw, code) in [
            ("Migros Sanal Market", "MIGROS"),
            ("migros", "MIGROS"),
            ("MİGROS JET", "MIGROS"),
            ("a101 kapıda", "A101"),
            ("şok market", "SOK"),
            ("ŞOK", "SOK"),
            ("BİM", "BIM"),
            ("bim a.ş.", "BIM"),
            ("CarrefourSA", "CARREFOUR"),
            ("Tarım Kredi Kooperatif", "TARIM_KREDİ"),
            ("TARIM KREDİ BİRLİK", "TARIM_KREDİ"),
        ] {
            assert_eq!(normalize_chain(raw), code, "input {raw:?}");
        }
    }

    #[test]
    fn unknown_chains_pass_through_uppercased() {
        assert_eq!(normalize_chain("hakmar express"), "HAKMAR EXPRESS");
        assert_eq!(normalize_chain("Öz Gürler"), "ÖZ GÜRLER");
        assert_eq!(normalize_chain(""), "");
    }

    #[test]
    fn normalization_is_stable_on_its_output() {
        for raw in ["migros", "şok", "hakmar", "Tarım Kredi"] {
            let once = normalize_chain(raw);
            assert_eq!(normalize_chain(&once), once);
        }
    }
}
