//! Small string helpers shared by services and handlers.

use url::Url;

use crate::errors::ServiceError;

const UNSAFE_FILE_NAME_CHARS: [char; 9] = ['/', '\\', '?', '*', ':', '|', '"', '<', '>'];

/// Replaces characters that are not allowed in file names with `_`.
pub fn create_safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if UNSAFE_FILE_NAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn transliterate(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' | 'ы' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "c",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' | 'ь' => "",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    };
    Some(latin)
}

/// Turns a product designation into an ASCII key usable in URLs and DOM ids.
///
/// Cyrillic is transliterated, the result is lowercased and every run of other
/// characters collapses into a single `_`. Leading and trailing separators are dropped.
pub fn to_safe_key(value: &str) -> String {
    let mut latin = String::with_capacity(value.len());
    for c in value.chars().flat_map(char::to_lowercase) {
        match transliterate(c) {
            Some(mapped) => latin.push_str(mapped),
            None => latin.push(c),
        }
    }

    let mut key = String::with_capacity(latin.len());
    let mut pending_separator = false;
    for c in latin.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !key.is_empty() {
                key.push('_');
            }
            pending_separator = false;
            key.push(c);
        } else {
            pending_separator = true;
        }
    }
    key
}

/// Percent-encodes one URL path segment; spaces become `%20`.
pub fn encode_path_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Absolute link printed into a part's QR code.
pub fn scan_url(base_url: &str, part_id: &str) -> Result<String, ServiceError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ServiceError::InternalError(format!("invalid public base url: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| ServiceError::InternalError("public base url cannot hold a path".into()))?
        .pop_if_empty()
        .push("scan")
        .push(part_id);
    Ok(url.to_string())
}
