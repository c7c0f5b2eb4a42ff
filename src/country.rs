/// Display data for an ISO 3166-1 alpha-2 country code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryInfo {
    pub name: String,
    pub flag: String,
}

/// Look up a country by its alpha-2 code (case-insensitive).
///
/// Returns `None` for anything that is not an assigned two-letter code.
pub fn lookup(code: &str) -> Option<CountryInfo> {
    let code = code.trim().to_ascii_uppercase();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let country = rust_iso3166::from_alpha2(&code)?;
    Some(CountryInfo {
        name: country.name.to_string(),
        flag: flag_emoji(&code)?,
    })
}

/// Map `A..=Z` onto the regional indicator symbols and join them into a flag.
fn flag_emoji(code: &str) -> Option<String> {
    const REGIONAL_INDICATOR_A: u32 = 0x1F1E6;
    code.bytes()
        .map(|b| char::from_u32(REGIONAL_INDICATOR_A + u32::from(b - b'A')))
        .collect()
}
