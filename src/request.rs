//! Build request model.

use crate::error::{BuildError, BuildResult};

/// Raw fields as received from a caller; every field may be missing.
#[derive(Debug, Clone, Default)]
pub struct BuildRequestFields {
    pub app_name: Option<String>,
    pub remote_host: Option<String>,
    pub remote_port: Option<String>,
    pub backend_url: Option<String>,
    pub package_name: Option<String>,
    pub icon: Option<Vec<u8>>,
}

/// A validated, immutable build request.
///
/// `remote_*`, `backend_url`, `package_name` and `icon` are carried through
/// for logging and future resource patches; only `app_name` is written into
/// the package today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub app_name: String,
    pub remote_host: String,
    pub remote_port: String,
    pub backend_url: Option<String>,
    pub package_name: Option<String>,
    pub icon: Option<Vec<u8>>,
}

impl BuildRequestFields {
    /// Check the required fields. Empty or whitespace-only values count as missing.
    pub fn validate(self) -> BuildResult<BuildRequest> {
        let mut missing = Vec::new();
        let app_name = required(self.app_name, "appName", &mut missing);
        let remote_host = required(self.remote_host, "remoteHost", &mut missing);
        let remote_port = required(self.remote_port, "remotePort", &mut missing);

        if !missing.is_empty() {
            return Err(BuildError::Validation(missing));
        }

        Ok(BuildRequest {
            app_name: app_name.unwrap_or_default(),
            remote_host: remote_host.unwrap_or_default(),
            remote_port: remote_port.unwrap_or_default(),
            backend_url: optional(self.backend_url),
            package_name: optional(self.package_name),
            icon: self.icon.filter(|bytes| !bytes.is_empty()),
        })
    }
}

fn required(
    value: Option<String>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    let value = optional(value);
    if value.is_none() {
        missing.push(name);
    }
    value
}

fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> BuildRequestFields {
        BuildRequestFields {
            app_name: Some("Test".into()),
            remote_host: Some("1.2.3.4".into()),
            remote_port: Some("4444".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_required_fields_only() {
        let req = complete().validate().unwrap();
        assert_eq!(req.app_name, "Test");
        assert_eq!(req.remote_host, "1.2.3.4");
        assert_eq!(req.remote_port, "4444");
        assert!(req.backend_url.is_none());
        assert!(req.icon.is_none());
    }

    #[test]
    fn test_reports_all_missing_fields() {
        let err = BuildRequestFields::default().validate().unwrap_err();
        match err {
            BuildError::Validation(fields) => {
                assert_eq!(fields, vec!["appName", "remoteHost", "remotePort"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let mut fields = complete();
        fields.remote_port = Some("   ".into());
        assert!(matches!(
            fields.validate(),
            Err(BuildError::Validation(f)) if f == vec!["remotePort"]
        ));
    }

    #[test]
    fn test_empty_optional_fields_are_dropped() {
        let mut fields = complete();
        fields.backend_url = Some(String::new());
        fields.package_name = Some("com.example.app".into());
        fields.icon = Some(Vec::new());
        let req = fields.validate().unwrap();
        assert!(req.backend_url.is_none());
        assert_eq!(req.package_name.as_deref(), Some("com.example.app"));
        assert!(req.icon.is_none());
    }
}
