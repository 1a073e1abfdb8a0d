//! Filename and folder sanitization for untrusted input.

use rand::Rng;

/// Maximum length of the base name (before timestamp and suffix).
pub const MAX_BASE_NAME_LEN: usize = 50;

/// Maximum number of folder segments kept.
pub const MAX_FOLDER_DEPTH: usize = 3;

/// Placeholder base name when nothing usable survives sanitization.
pub const DEFAULT_BASE_NAME: &str = "file";

/// Folder used when the declared folder reduces to nothing.
pub const DEFAULT_FOLDER: &str = "uploads";

/// Length of the random uniqueness suffix.
const SUFFIX_LEN: usize = 8;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A sanitized filename split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeName {
    /// Sanitized base name, at most [`MAX_BASE_NAME_LEN`] characters.
    pub base: String,
    /// Lower-cased extension without the dot; empty when there is none.
    pub extension: String,
}

impl SafeName {
    /// Render the final on-disk name with the given timestamp and suffix.
    pub fn render(&self, timestamp: &str, suffix: &str) -> String {
        if self.extension.is_empty() {
            format!("{}_{timestamp}_{suffix}", self.base)
        } else {
            format!("{}_{timestamp}_{suffix}.{}", self.base, self.extension)
        }
    }

    /// Render with the current UTC time and a fresh random suffix.
    pub fn unique(&self) -> String {
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        self.render(&timestamp, &random_suffix())
    }
}

fn is_disallowed(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '/' | '\\' | ';' | ':' | '?' | '*' | '<' | '>' | '|' | '"' | '\''
        )
}

/// Keep only the final path segment of a declared name.
fn last_segment(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Replace disallowed characters, drop non-ASCII, collapse whitespace runs.
fn clean(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_space = false;
    for c in input.chars().filter(char::is_ascii) {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        out.push(if is_disallowed(c) { '_' } else { c });
    }
    out
}

/// The lower-cased extension of a declared filename, without the dot.
///
/// Looks only at the final path segment. Returns an empty string when the
/// name has no extension.
pub fn extension_of(name: &str) -> String {
    let segment = last_segment(name).trim();
    match segment.rsplit_once('.') {
        Some((base, ext)) if !base.trim_matches('.').is_empty() => ext.trim().to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Sanitize a declared filename into a safe base name and extension.
pub fn sanitize_filename(name: &str) -> SafeName {
    let segment = last_segment(name).trim();

    let (raw_base, raw_ext) = match segment.rsplit_once('.') {
        Some((base, ext)) if !base.trim_matches('.').is_empty() => (base, ext),
        _ => (segment, ""),
    };

    let extension: String = raw_ext
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(16)
        .collect();

    let cleaned = clean(raw_base);
    // Leading dots would produce hidden files or relative components.
    let cleaned = cleaned.trim_start_matches(['.', '_']).trim_end_matches('_');
    let base: String = cleaned.chars().take(MAX_BASE_NAME_LEN).collect();
    let base = if base.is_empty() {
        DEFAULT_BASE_NAME.to_string()
    } else {
        base
    };

    SafeName { base, extension }
}

/// Sanitize a declared destination folder into a relative path of at most
/// [`MAX_FOLDER_DEPTH`] segments.
pub fn sanitize_folder(folder: &str) -> String {
    let normalized = folder
        .replace('\\', "/")
        .replace("..", "")
        .replace("./", "")
        .replace('~', "");

    let segments: Vec<String> = normalized
        .split('/')
        .map(|segment| clean(segment.trim()))
        .map(|segment| segment.trim_matches(['.', '_']).to_string())
        .filter(|segment| !segment.is_empty())
        .take(MAX_FOLDER_DEPTH)
        .collect();

    if segments.is_empty() {
        DEFAULT_FOLDER.to_string()
    } else {
        segments.join("/")
    }
}

/// Random lower-case alphanumeric suffix.
///
/// `thread_rng` is a CSPRNG, so suffixes are also unguessable.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}
