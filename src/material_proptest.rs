//! Property-based tests for material identity and filter paths.
//!
//! These tests use proptest to generate random materials and verify that
//! fingerprint invariants hold for all of them.

#[cfg(test)]
mod proptest_tests {
    use crate::material::{mask_url, MaterialIdentity};
    use crate::path::{encode_url_path, to_filter_path};
    use proptest::prelude::*;
    use std::path::PathBuf;

    // ============================================================================
    // fingerprint property tests
    // ============================================================================

    proptest! {
        /// Property: the password never changes a fingerprint
        #[test]
        fn fingerprint_ignores_password(
            url in "[a-z]{1,10}://[a-z.]{1,20}/[a-z]{0,10}",
            username in "[a-z]{0,8}",
            first in ".{0,16}",
            second in ".{0,16}",
        ) {
            let one = MaterialIdentity::svn(url.clone()).with_username(username.clone()).with_password(first);
            let two = MaterialIdentity::svn(url).with_username(username).with_password(second);
            prop_assert_eq!(one.fingerprint(), two.fingerprint());
            prop_assert_eq!(one, two);
        }

        /// Property: different URLs give different fingerprints
        #[test]
        fn fingerprint_tracks_url(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
            prop_assume!(a != b);
            let one = MaterialIdentity::git(format!("https://example.com/{}", a));
            let two = MaterialIdentity::git(format!("https://example.com/{}", b));
            prop_assert_ne!(one.fingerprint(), two.fingerprint());
        }

        /// Property: different usernames give different svn fingerprints
        #[test]
        fn fingerprint_tracks_username(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assume!(a != b);
            let one = MaterialIdentity::svn("svn://host/repo").with_username(a);
            let two = MaterialIdentity::svn("svn://host/repo").with_username(b);
            prop_assert_ne!(one.fingerprint(), two.fingerprint());
        }

        /// Property: fingerprints are 64 lowercase hex characters
        #[test]
        fn fingerprint_is_lowercase_sha256_hex(url in ".{0,40}", externals in any::<bool>()) {
            let fingerprint = MaterialIdentity::svn(url).with_check_externals(externals).fingerprint();
            prop_assert_eq!(fingerprint.as_str().len(), 64);
            prop_assert!(fingerprint.as_str().chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }

        /// Property: the destination changes only the pipeline-unique fingerprint
        #[test]
        fn destination_only_affects_pipeline_unique_fingerprint(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            prop_assume!(a != b);
            let one = MaterialIdentity::hg("https://example.com/hg").with_destination(a);
            let two = MaterialIdentity::hg("https://example.com/hg").with_destination(b);
            prop_assert_eq!(one.fingerprint(), two.fingerprint());
            prop_assert_ne!(one.pipeline_unique_fingerprint(), two.pipeline_unique_fingerprint());
        }
    }

    // ============================================================================
    // masking and folder naming property tests
    // ============================================================================

    proptest! {
        /// Property: masked URLs never contain the embedded password
        #[test]
        fn mask_url_hides_password(user in "[a-z]{1,8}", password in "[A-Z0-9]{6,12}", host in "[a-z]{3,10}") {
            let masked = mask_url(&format!("https://{}:{}@{}.com/repo", user, password, host));
            prop_assert!(!masked.contains(&password));
            prop_assert!(masked.contains("******"));
        }

        /// Property: folder names contain no path separators
        #[test]
        fn folder_name_is_single_component(path in "[a-z/]{1,30}") {
            let material = MaterialIdentity::git(format!("https://example.com/{}", path));
            let folder = material.folder_name();
            prop_assert!(!folder.contains('/'));
            prop_assert!(!folder.contains('\\'));
            prop_assert_eq!(encode_url_path(&folder), folder);
        }

        /// Property: filter paths always start with a single slash
        #[test]
        fn filter_path_is_rooted(segments in prop::collection::vec("[a-z]{1,6}", 1..5)) {
            let relative: PathBuf = segments.iter().collect();
            let rendered = to_filter_path(&relative);
            prop_assert!(rendered.starts_with('/'));
            prop_assert!(!rendered.starts_with("//"));
            prop_assert_eq!(rendered, format!("/{}", segments.join("/")));
        }
    }
}
