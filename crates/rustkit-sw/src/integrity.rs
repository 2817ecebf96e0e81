//! Subresource integrity checks.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Check `body` against integrity metadata such as `sha384-<base64>`.
///
/// Multiple space-separated hashes are allowed; only the strongest algorithm
/// present is considered, and any one of its hashes may match. Metadata with
/// no recognised algorithm is treated as absent.
pub fn verify(integrity: &str, body: &[u8]) -> bool {
    let parsed: Vec<(u8, &str, &str)> = integrity
        .split_whitespace()
        .filter_map(|token| {
            let (algorithm, rest) = token.split_once('-')?;
            // Options after '?' are ignored.
            let digest = rest.split('?').next().unwrap_or(rest);
            let strength = match algorithm {
                "sha256" => 1,
                "sha384" => 2,
                "sha512" => 3,
                _ => return None,
            };
            Some((strength, algorithm, digest))
        })
        .collect();

    let Some(strongest) = parsed.iter().map(|(s, _, _)| *s).max() else {
        return true;
    };

    parsed
        .iter()
        .filter(|(s, _, _)| *s == strongest)
        .any(|(_, algorithm, expected)| digest(algorithm, body) == *expected)
}

fn digest(algorithm: &str, body: &[u8]) -> String {
    match algorithm {
        "sha256" => STANDARD.encode(Sha256::digest(body)),
        "sha384" => STANDARD.encode(Sha384::digest(body)),
        _ => STANDARD.encode(Sha512::digest(body)),
    }
}

/// Integrity metadata for `body` using sha256.
pub fn sha256_integrity(body: &[u8]) -> String {
    format!("sha256-{}", digest("sha256", body))
}
