//! Shared HTTP plumbing for the Supabase storage and table APIs.

use reqwest::{Client, Method, RequestBuilder, Response};

/// Connection settings for a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// API key sent as both `apikey` and bearer token.
    pub key: String,
    /// Storage bucket holding documents and signature crops.
    pub bucket: String,
}

/// Authenticated Supabase HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            http: Client::new(),
            config: SupabaseConfig {
                url: config.url.trim_end_matches('/').to_string(),
                ..config
            },
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Absolute URL for a path under the project, e.g. `/rest/v1/profiles`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    /// Start an authenticated request against the project.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", &self.config.key)
            .bearer_auth(&self.config.key)
    }

    /// Unauthenticated GET for absolute URLs outside the project API.
    pub fn get_url(&self, url: &str) -> RequestBuilder {
        self.http.get(url)
    }
}

/// Turn a non-2xx response into `(status, body)` for the caller's error type.
pub async fn check_status(response: Response) -> Result<Response, (u16, String)> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err((status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = SupabaseClient::new(SupabaseConfig {
            url: "https://example.supabase.co/".into(),
            key: "k".into(),
            bucket: "b".into(),
        });
        assert_eq!(
            client.endpoint("/rest/v1/profiles"),
            "https://example.supabase.co/rest/v1/profiles"
        );
        assert_eq!(client.bucket(), "b");
    }
}
