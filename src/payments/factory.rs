use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{HostedCheckoutProvider, MobileMoneyProvider, ReferenceProvider};
use crate::payments::types::ProviderName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub enabled_providers: Vec<ProviderName>,
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "mobile_money,reference,hosted_checkout".to_string());
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }
        Ok(Self { enabled_providers })
    }
}

/// Providers built once at startup and shared across requests.
///
/// A provider whose configuration is missing is left out of the registry;
/// lookups for it fail the same way a disabled provider does.
#[derive(Clone, Default)]
pub struct PaymentProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
}

impl PaymentProviderRegistry {
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        let mut registry = Self::default();

        for name in config.enabled_providers {
            let built: PaymentResult<Arc<dyn PaymentProvider>> = match name {
                ProviderName::MobileMoney => {
                    MobileMoneyProvider::from_env().map(|p| Arc::new(p) as Arc<dyn PaymentProvider>)
                }
                ProviderName::Reference => {
                    ReferenceProvider::from_env().map(|p| Arc::new(p) as Arc<dyn PaymentProvider>)
                }
                ProviderName::HostedCheckout => HostedCheckoutProvider::from_env()
                    .map(|p| Arc::new(p) as Arc<dyn PaymentProvider>),
            };
            match built {
                Ok(provider) => {
                    info!(provider = %name, "payment provider registered");
                    registry.providers.insert(name, provider);
                }
                Err(e) => warn!(provider = %name, error = %e, "payment provider not configured"),
            }
        }

        Ok(registry)
    }

    pub fn with_providers(providers: Vec<Arc<dyn PaymentProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.name(), p)).collect(),
        }
    }

    pub fn get_provider(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("provider {} is not available", provider),
                field: Some("provider".to_string()),
            })
    }

    /// Resolves a provider from a webhook path segment.
    pub fn resolve(&self, raw: &str) -> Option<Arc<dyn PaymentProvider>> {
        ProviderName::from_str(raw)
            .ok()
            .and_then(|name| self.providers.get(&name).cloned())
    }

    pub fn list_available_providers(&self) -> Vec<ProviderName> {
        let mut names: Vec<ProviderName> = self.providers.keys().copied().collect();
        names.sort_by_key(|n| n.as_str());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::{ReferenceConfig, ReferenceProvider};

    fn reference_provider() -> Arc<dyn PaymentProvider> {
        Arc::new(
            ReferenceProvider::new(ReferenceConfig {
                api_key: "k".to_string(),
                webhook_secret: "s".to_string(),
                base_url: "https://api.refpay.example.com".to_string(),
                timeout_secs: 5,
                max_retries: 0,
                expiry_minutes: 60,
            })
            .expect("provider init should succeed"),
        )
    }

    #[test]
    fn registry_resolves_registered_providers_only() {
        let registry = PaymentProviderRegistry::with_providers(vec![reference_provider()]);
        assert!(registry.resolve("atm").is_some());
        assert!(registry.resolve("mobile_money").is_none());
        assert!(registry.resolve("unknown").is_none());
        assert!(registry.get_provider(ProviderName::HostedCheckout).is_err());
        assert_eq!(
            registry.list_available_providers(),
            vec![ProviderName::Reference]
        );
    }
}
