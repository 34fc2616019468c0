use std::collections::HashMap;

use tracing::warn;
use url::Url;

use crate::config::ProviderConfig;
use crate::error::AppError;

/// A provider whose endpoints passed the HTTPS check.
#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
    pub authorize_url: Url,
    pub token_url: Url,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl Provider {
    /// Authorization-code redirect carrying `state`.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorize_url.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri);
            if !self.scopes.is_empty() {
                q.append_pair("scope", &self.scopes.join(" "));
            }
            q.append_pair("state", state);
        }
        url
    }
}

/// Allow-list of configured providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new(configs: &[ProviderConfig]) -> Self {
        let providers = configs
            .iter()
            .map(|c| (c.name.to_lowercase(), c.clone()))
            .collect::<HashMap<_, _>>();
        for (name, cfg) in &providers {
            if https_url(&cfg.authorize_url).is_none() || https_url(&cfg.token_url).is_none() {
                warn!(provider = %name, "oauth provider has a non-https endpoint and will be refused");
            }
        }
        Self { providers }
    }

    /// Unknown names and non-HTTPS endpoints are both refused.
    pub fn resolve(&self, name: &str) -> Result<Provider, AppError> {
        let key = name.to_lowercase();
        let cfg = self
            .providers
            .get(&key)
            .ok_or_else(|| AppError::UnsupportedProvider(name.to_string()))?;
        let (Some(authorize_url), Some(token_url)) =
            (https_url(&cfg.authorize_url), https_url(&cfg.token_url))
        else {
            warn!(provider = %key, "refusing provider with non-https endpoint");
            return Err(AppError::UnsupportedProvider(name.to_string()));
        };
        Ok(Provider {
            name: key,
            authorize_url,
            token_url,
            client_id: cfg.client_id.clone(),
            redirect_uri: cfg.redirect_uri.clone(),
            scopes: cfg.scopes.clone(),
        })
    }
}

fn https_url(raw: &str) -> Option<Url> {
    Url::parse(raw)
        .ok()
        .filter(|u| u.scheme() == "https" && u.host_str().is_some())
}
