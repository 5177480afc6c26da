//! URL slug generation for catalog entries.

use uuid::Uuid;

/// Maximum slug length accepted by the `products.slug` column.
pub const SLUG_MAX_LEN: usize = 255;

const SUFFIX_LEN: usize = 8;
const FALLBACK_BASE: &str = "product";

/// Lower-case ASCII slug: letters with a known ASCII form are transliterated,
/// every other run of non-alphanumerics becomes a single `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut needs_separator = false;

    for ch in text.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            Some(ch.to_ascii_lowercase())
        } else {
            transliterate(ch)
        };

        match mapped {
            Some(c) => {
                if needs_separator && !slug.is_empty() {
                    slug.push('-');
                }
                needs_separator = false;
                slug.push(c);
            }
            None => needs_separator = true,
        }
    }

    slug
}

/// Slug for a new or renamed product: `slugify(name)` plus a random 8 hex
/// digit suffix, always within [`SLUG_MAX_LEN`].
pub fn unique_slug(name: &str) -> String {
    let mut base = slugify(name);
    base.truncate(SLUG_MAX_LEN - SUFFIX_LEN - 1);
    let base = base.trim_end_matches('-');
    let base = if base.is_empty() { FALLBACK_BASE } else { base };

    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", base, &suffix[..SUFFIX_LEN])
}

fn transliterate(ch: char) -> Option<char> {
    let c = match ch {
        'ı' | 'İ' | 'í' | 'Í' | 'ì' | 'î' | 'ï' => 'i',
        'ş' | 'Ş' | 'ß' => 's',
        'ğ' | 'Ğ' => 'g',
        'ü' | 'Ü' | 'ú' | 'Ú' | 'ù' | 'û' => 'u',
        'ö' | 'Ö' | 'ó' | 'Ó' | 'ò' | 'ô' => 'o',
        'ç' | 'Ç' => 'c',
        'á' | 'Á' | 'à' | 'â' | 'ä' | 'Ä' | 'ã' => 'a',
        'é' | 'É' | 'è' | 'ê' | 'ë' => 'e',
        'ñ' | 'Ñ' => 'n',
        _ => return None,
    };
    Some(c)
}
