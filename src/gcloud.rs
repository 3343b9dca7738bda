use crate::error::WaphlError;
use crate::tools;

pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// OAuth bearer token shared by the Terra and GCS clients.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Result<Self, WaphlError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(WaphlError::AccessToken("empty token".to_string()));
        }
        Ok(Self(token))
    }

    /// `GOOGLE_OAUTH_ACCESS_TOKEN` when set, otherwise the active gcloud
    /// account's token.
    pub fn resolve() -> Result<Self, WaphlError> {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                return Self::new(token);
            }
        }
        let gcloud = tools::require_tool("gcloud")?;
        let output = tools::run_tool(
            &gcloud,
            &["auth".to_string(), "print-access-token".to_string()],
            WaphlError::AccessToken,
        )?;
        Self::new(output.stdout)
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_trimmed_and_redacted() {
        let token = AccessToken::new("ya29.token\n").unwrap();
        assert_eq!(token.bearer(), "Bearer ya29.token");
        assert_eq!(format!("{token:?}"), "AccessToken(..)");
        assert!(AccessToken::new("  ").is_err());
    }
}
