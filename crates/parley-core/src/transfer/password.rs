//! The archive name carries the one-time password, sealed to the recipient:
//! `percent(base64(sealed_password)).parcel`.

use base64::{engine::general_purpose::STANDARD, Engine};

use parley_shared::constants::ARCHIVE_EXTENSION;
use parley_shared::error::ProtocolError;

use crate::error::TransferError;

pub fn archive_name(sealed_password: &[u8]) -> String {
    format!(
        "{}.{ARCHIVE_EXTENSION}",
        percent_encode(&STANDARD.encode(sealed_password))
    )
}

/// Recover the sealed password from an archive name.
pub fn sealed_password_from_name(name: &str) -> Result<Vec<u8>, TransferError> {
    let stem = name
        .strip_suffix(ARCHIVE_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
        .ok_or_else(|| TransferError::InvalidArchiveName(name.to_string()))?;
    let encoded = percent_decode(stem)?;
    STANDARD
        .decode(encoded)
        .map_err(|e| TransferError::InvalidArchiveName(e.to_string()))
}

/// Escape everything outside the RFC 3986 unreserved set.
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn percent_decode(s: &str) -> Result<Vec<u8>, ProtocolError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'%' => {
                if index + 2 >= bytes.len() {
                    return Err(ProtocolError::InvalidPercentEncoding);
                }
                let decoded = hex::decode(&bytes[index + 1..index + 3])
                    .map_err(|_| ProtocolError::InvalidPercentEncoding)?;
                out.extend_from_slice(&decoded);
                index += 3;
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_filesystem_safe() {
        // Bytes chosen so the base64 form contains '+', '/' and '='.
        let sealed = [0xfb, 0xff, 0xbf, 0x00];
        let name = archive_name(&sealed);

        assert!(name.ends_with(".parcel"));
        assert!(!name.contains('/'));
        assert!(!name.contains('+'));
        assert!(!name.contains('='));
        assert_eq!(sealed_password_from_name(&name).unwrap(), sealed);
    }

    #[test]
    fn test_truncated_escape_rejected() {
        assert!(matches!(
            percent_decode("abc%4"),
            Err(ProtocolError::InvalidPercentEncoding)
        ));
        assert!(matches!(
            percent_decode("%zz"),
            Err(ProtocolError::InvalidPercentEncoding)
        ));
        assert_eq!(percent_decode("a%2Fb").unwrap(), b"a/b");
    }

    #[test]
    fn test_wrong_extension_rejected() {
        assert!(matches!(
            sealed_password_from_name("photo.jpg"),
            Err(TransferError::InvalidArchiveName(_))
        ));
    }
}
