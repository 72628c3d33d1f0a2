//! Git remote URL normalisation.
//!
//! Webhook payloads report HTTPS clone URLs while a local checkout may use the
//! SSH shorthand (`git@github.com:owner/repo.git`). Both are reduced to the
//! same lower-cased `https://host/owner/repo` form before comparison.

const GIT_SUFFIX: &str = ".git";
const SSH_PREFIX: &str = "git@";

/// Canonicalise a git remote URL. Never fails: unrecognised input is returned
/// lower-cased with the known suffix removed.
pub fn normalize(url: &str) -> String {
    let trimmed = url.strip_suffix(GIT_SUFFIX).unwrap_or(url);

    let rewritten = match trimmed.strip_prefix(SSH_PREFIX) {
        Some(rest) => match rest.split_once(':') {
            Some((host, path)) => format!("https://{}/{}", host, path),
            None => format!("https://{}", rest),
        },
        None => trimmed.to_string(),
    };

    let with_scheme = if rewritten.starts_with("http://") || rewritten.starts_with("https://") {
        rewritten
    } else {
        format!("https://{}", rewritten)
    };

    with_scheme.to_lowercase()
}

/// Two remote URLs refer to the same repository once normalised.
pub fn urls_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}
