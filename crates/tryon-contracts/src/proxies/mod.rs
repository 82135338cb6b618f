use std::fmt;

/// Placeholder replaced by the percent-encoded target URL.
pub const TARGET_PLACEHOLDER: &str = "{url}";

/// Fewest distinct providers a configured proxy list may hold.
pub const MIN_PROXIES: usize = 2;

pub trait NamedProvider {
    fn name(&self) -> &str;
}

/// Ordered set of named providers. Iteration order is the order of
/// insertion, which is also the order providers are tried in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: Vec<T>,
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers
            .iter()
            .find(|provider| provider.name() == name)
    }

    /// Names sorted alphabetically, for display.
    pub fn list(&self) -> Vec<String> {
        let mut names = self
            .providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> &[T] {
        self.providers.as_slice()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// A pass-through HTTP relay that fetches a remote resource on our behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    name: String,
    template: String,
}

impl ProxyEndpoint {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Result<Self, ProxyConfigError> {
        let name = name.into().trim().to_string();
        let template = template.into().trim().to_string();
        if name.is_empty() {
            return Err(ProxyConfigError::MissingName(template));
        }
        if !template.contains(TARGET_PLACEHOLDER) {
            return Err(ProxyConfigError::MissingPlaceholder(name));
        }
        Ok(Self { name, template })
    }

    pub fn request_url(&self, target: &str) -> String {
        self.template
            .replace(TARGET_PLACEHOLDER, &urlencoding::encode(target.trim()))
    }
}

impl NamedProvider for ProxyEndpoint {
    fn name(&self) -> &str {
        self.name.as_str()
    }
}

pub type ProxyList = ProviderRegistry<ProxyEndpoint>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyConfigError {
    MissingName(String),
    MissingPlaceholder(String),
    DuplicateName(String),
    TooFew { count: usize },
}

impl fmt::Display for ProxyConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingName(template) => write!(f, "proxy template '{template}' has no name"),
            Self::MissingPlaceholder(name) => {
                write!(f, "proxy '{name}' template must contain {TARGET_PLACEHOLDER}")
            }
            Self::DuplicateName(name) => write!(f, "proxy '{name}' is listed more than once"),
            Self::TooFew { count } => write!(
                f,
                "proxy list needs at least {MIN_PROXIES} providers to fall back between, got {count}"
            ),
        }
    }
}

impl std::error::Error for ProxyConfigError {}

pub fn default_proxies() -> ProxyList {
    ProviderRegistry::new(vec![
        ProxyEndpoint {
            name: "allorigins".to_string(),
            template: "https://api.allorigins.win/raw?url={url}".to_string(),
        },
        ProxyEndpoint {
            name: "corsproxy".to_string(),
            template: "https://corsproxy.io/?{url}".to_string(),
        },
    ])
}

/// Parses `name=template,name=template`. Names must be distinct and at
/// least [`MIN_PROXIES`] entries are required.
pub fn parse_proxy_list(raw: &str) -> Result<ProxyList, ProxyConfigError> {
    let mut endpoints: Vec<ProxyEndpoint> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (name, template) = entry
            .split_once('=')
            .ok_or_else(|| ProxyConfigError::MissingName(entry.to_string()))?;
        let endpoint = ProxyEndpoint::new(name, template)?;
        if endpoints.iter().any(|known| known.name == endpoint.name) {
            return Err(ProxyConfigError::DuplicateName(endpoint.name));
        }
        endpoints.push(endpoint);
    }
    if endpoints.len() < MIN_PROXIES {
        return Err(ProxyConfigError::TooFew {
            count: endpoints.len(),
        });
    }
    Ok(ProviderRegistry::new(endpoints))
}
