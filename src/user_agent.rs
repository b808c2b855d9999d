//! Browser header profiles rotated across outbound requests.
//!
//! Digital-library front ends sit behind WAFs that reject obvious tool
//! traffic. Each request picks one complete, internally consistent profile
//! so User-Agent and language hints never contradict each other.

use rand::seq::SliceRandom;

/// A consistent set of browser identification headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BrowserProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

const BROWSER_PROFILES: [BrowserProfile; 4] = [
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
        accept_language: "en-US,en;q=0.5",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
            (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
            Chrome/130.0.0.0 Safari/537.36",
        accept_language: "en-GB,en;q=0.9,it;q=0.8",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 \
            (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
        accept_language: "en-US,en;q=0.9,fr;q=0.7",
    },
];

/// Picks one profile at random for the next request.
#[must_use]
pub(crate) fn pick_profile() -> &'static BrowserProfile {
    BROWSER_PROFILES
        .choose(&mut rand::thread_rng())
        .unwrap_or(&BROWSER_PROFILES[0])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_look_like_browsers() {
        for profile in &BROWSER_PROFILES {
            assert!(
                profile.user_agent.starts_with("Mozilla/5.0 ("),
                "unexpected UA: {}",
                profile.user_agent
            );
            assert!(!profile.user_agent.contains("  "), "stray whitespace in UA");
            assert!(profile.accept_language.starts_with("en"));
        }
    }

    #[test]
    fn test_pick_profile_returns_known_profile() {
        for _ in 0..20 {
            let picked = pick_profile();
            assert!(BROWSER_PROFILES.contains(picked));
        }
    }
}
