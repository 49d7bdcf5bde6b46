// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    borrow::Cow,
    fs,
    io::{self, Read, Write},
    path::Path,
};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use urlencoding::encode;

pub const DEFAULT_USER_AGENT: &str =
    "input4mips-validation github.com/climate-resource/input4mips_validation";

/// Prefix of all tracking IDs, as registered with the handle system.
pub const TRACKING_ID_PREFIX: &str = "hdl:21.14100/";

/// The format of `creation_date` attributes.
pub const CREATION_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// URL-encodes a string,
/// so it can be used as a single path component.
///
/// ```
/// # use input4mips_validation::tools::url_encode;
/// assert_eq!(url_encode(r#"Hello World"#), "Hello%20World");
/// assert_eq!(url_encode("gh:main"), "gh%3Amain");
/// ```
#[must_use]
pub fn url_encode(input: &str) -> Cow<str> {
    encode(input)
}

/// Hex-encoded SHA-256 digest of some bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex-encoded SHA-256 digest of a files content,
/// read in chunks, so large data files do not end up in memory.
///
/// # Errors
///
/// If the file can not be opened or read.
pub fn sha256_file(path: impl AsRef<Path>) -> io::Result<String> {
    let mut file = fs::File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Generates a new, random tracking ID.
///
/// ```
/// # use input4mips_validation::tools::generate_tracking_id;
/// assert!(generate_tracking_id().starts_with("hdl:21.14100/"));
/// ```
#[must_use]
pub fn generate_tracking_id() -> String {
    format!("{TRACKING_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// The current time (UTC), formatted as a `creation_date` attribute.
#[must_use]
pub fn generate_creation_timestamp() -> String {
    Utc::now().format(CREATION_DATE_FORMAT).to_string()
}

/// Writes `contents` to a temporary file next to `file` first,
/// and then moves it into place,
/// so readers never see a half written `file`.
///
/// # Errors
///
/// If writing or moving fails.
pub fn write_atomically(file: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let path = file.as_ref();
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(contents.as_ref())?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.nc");
        fs::write(&file, b"some payload").unwrap();
        assert_eq!(sha256_file(&file).unwrap(), sha256_hex(b"some payload"));
    }

    #[test]
    fn test_tracking_ids_differ() {
        assert_ne!(generate_tracking_id(), generate_tracking_id());
    }

    #[test]
    fn test_creation_timestamp_shape() {
        let stamp = generate_creation_timestamp();
        assert_eq!(stamp.len(), "2024-01-01T00:00:00Z".len());
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn test_write_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("entry.json");
        write_atomically(&file, "{}").unwrap();
        write_atomically(&file, "{\"revision\": 1}").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "{\"revision\": 1}");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("entry.json")]);
    }
}
