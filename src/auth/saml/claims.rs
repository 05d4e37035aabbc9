use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An attribute recognised under a short name or its URI-qualified form.
#[derive(Debug, Clone, Copy)]
pub struct ClaimName {
    pub short: &'static str,
    pub uri: &'static str,
}

impl ClaimName {
    pub const GIVEN_NAME: ClaimName = ClaimName {
        short: "firstName",
        uri: "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname",
    };
    pub const FAMILY_NAME: ClaimName = ClaimName {
        short: "lastName",
        uri: "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname",
    };
    pub const DISPLAY_NAME: ClaimName = ClaimName {
        short: "displayName",
        uri: "http://schemas.microsoft.com/identity/claims/displayname",
    };
    pub const GROUPS: ClaimName = ClaimName {
        short: "groups",
        uri: "http://schemas.xmlsoap.org/claims/Group",
    };

    /// Values under the short name if it is present, otherwise under the URI.
    fn values<'a>(&self, attributes: &'a BTreeMap<String, Vec<String>>) -> &'a [String] {
        attributes
            .get(self.short)
            .filter(|v| !v.is_empty())
            .or_else(|| attributes.get(self.uri))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn first(&self, attributes: &BTreeMap<String, Vec<String>>) -> Option<String> {
        self.values(attributes)
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Identity claims taken from a verified assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedClaims {
    /// NameID, used as the canonical email.
    pub subject: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub display_name: Option<String>,
    pub groups: Vec<String>,
    pub assertion_id: String,
    pub session_index: Option<String>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Every asserted attribute, name to values.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl NormalizedClaims {
    pub(crate) fn from_attributes(
        subject: String,
        assertion_id: String,
        session_index: Option<String>,
        not_on_or_after: Option<DateTime<Utc>>,
        attributes: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let groups = ClaimName::GROUPS
            .values(&attributes)
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            subject,
            given_name: ClaimName::GIVEN_NAME.first(&attributes),
            family_name: ClaimName::FAMILY_NAME.first(&attributes),
            display_name: ClaimName::DISPLAY_NAME.first(&attributes),
            groups,
            assertion_id,
            session_index,
            not_on_or_after,
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn claims(attrs: &[(&str, &[&str])]) -> NormalizedClaims {
        let attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        NormalizedClaims::from_attributes(
            "jane@example.com".into(),
            "_a1".into(),
            None,
            None,
            attributes,
        )
    }

    #[rstest]
    #[case::short_only(&[("firstName", &["Jane"][..])], Some("Jane"))]
    #[case::uri_only(&[(ClaimName::GIVEN_NAME.uri, &["Jane"][..])], Some("Jane"))]
    #[case::short_wins(
        &[("firstName", &["Jane"][..]), (ClaimName::GIVEN_NAME.uri, &["Janet"][..])],
        Some("Jane")
    )]
    #[case::empty_short_falls_back(
        &[("firstName", &[][..]), (ClaimName::GIVEN_NAME.uri, &["Janet"][..])],
        Some("Janet")
    )]
    #[case::blank_value_ignored(&[("firstName", &["  "][..])], None)]
    #[case::absent(&[], None)]
    fn test_given_name_resolution(
        #[case] attrs: &[(&str, &[&str])],
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(claims(attrs).given_name.as_deref(), expected);
    }

    #[test]
    fn test_all_claims_mapped_from_uris() {
        let c = claims(&[
            (ClaimName::GIVEN_NAME.uri, &["Jane"][..]),
            (ClaimName::FAMILY_NAME.uri, &["Doe"][..]),
            (ClaimName::DISPLAY_NAME.uri, &["Jane Doe"][..]),
            (ClaimName::GROUPS.uri, &["eng", "", "ops"][..]),
        ]);
        assert_eq!(c.given_name.as_deref(), Some("Jane"));
        assert_eq!(c.family_name.as_deref(), Some("Doe"));
        assert_eq!(c.display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(c.groups, vec!["eng", "ops"]);
    }

    #[test]
    fn test_groups_short_name_preferred() {
        let c = claims(&[("groups", &["a"][..]), (ClaimName::GROUPS.uri, &["b", "c"][..])]);
        assert_eq!(c.groups, vec!["a"]);
    }
}
