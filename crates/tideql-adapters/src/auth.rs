/// Credential material consumed by adapters when building requests.
///
/// Acquisition (OAuth flows, token refresh) is out of scope; adapters only
/// consume the resulting headers, and the variants here are immutable, so
/// concurrent reads need no synchronisation.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
    ApiKey {
        header: String,
        key: String,
    },
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: Option<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password,
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Auth::Bearer(token.into())
    }

    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        Auth::ApiKey {
            header: header.into(),
            key: key.into(),
        }
    }

    pub fn apply(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_deref()),
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
        }
    }

    pub fn apply_async(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_deref()),
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
        }
    }
}
