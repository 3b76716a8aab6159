//! Application configuration document and the settings merge.
//!
//! The configuration is a singleton document. Updates arrive as a [`ConfigurationPatch`], and the
//! stored document is itself read back as a patch so that a document written by an older version
//! (missing newer fields) still yields a complete [`Configuration`].
//!
//! There is exactly one merge function, [`Configuration::merged`]. It is used both when reconciling
//! the stored document against [`Configuration::default`] and when applying an administrative
//! update to the in-memory record, so the two paths cannot drift apart.
//!
//! Merge rules:
//! - top-level scalars (`appName`, `allowRegistrations`, `maintenanceMode`) are replaced when
//!   present in the patch
//! - the nested groups (`branding`, each entry of `apiKeys`, each entry of `paymentMethods`) are
//!   merged field by field, so omitting a nested field keeps its previous value

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub app_name: String,
    pub branding: Branding,
    pub api_keys: ApiKeys,
    pub allow_registrations: bool,
    pub maintenance_mode: bool,
    pub payment_methods: PaymentMethods,
}

/// Branding images, stored as base64 data URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branding {
    pub logo: Option<String>,
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(rename = "googleGenAI")]
    pub google_gen_ai: ProviderKey,
    pub veo: ProviderKey,
}

/// An administrator-provided key for an external provider.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKey {
    pub key: String,
    pub enabled: bool,
}

impl ProviderKey {
    /// The key, if the provider is enabled and the key is not blank.
    pub fn usable_key(&self) -> Option<&str> {
        let key = self.key.trim();
        (self.enabled && !key.is_empty()).then_some(key)
    }
}

impl std::fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKey")
            .field("key", &if self.key.is_empty() { "" } else { "<redacted>" })
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethods {
    pub stripe: StripeSettings,
    pub paypal: PaypalSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StripeSettings {
    pub enabled: bool,
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaypalSettings {
    pub enabled: bool,
    pub client_id: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            app_name: "Veo Animator SaaS".to_string(),
            branding: Branding::default(),
            api_keys: ApiKeys::default(),
            allow_registrations: true,
            maintenance_mode: false,
            payment_methods: PaymentMethods::default(),
        }
    }
}

impl Default for PaymentMethods {
    fn default() -> Self {
        Self {
            stripe: StripeSettings {
                enabled: true,
                public_key: "pk_test_...".to_string(),
            },
            paypal: PaypalSettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Partial documents
// ---------------------------------------------------------------------------------------------

/// Partial configuration. Every level is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigurationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branding: Option<BrandingPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<ApiKeysPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_registrations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_methods: Option<PaymentMethodsPatch>,
}

/// Branding images distinguish "absent" (keep) from `null` (clear).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandingPatch {
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub logo: Option<Option<String>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub favicon: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeysPatch {
    #[serde(rename = "googleGenAI", skip_serializing_if = "Option::is_none")]
    pub google_gen_ai: Option<ProviderKeyPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub veo: Option<ProviderKeyPatch>,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderKeyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl std::fmt::Debug for ProviderKeyPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKeyPatch")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentMethodsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe: Option<StripeSettingsPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paypal: Option<PaypalSettingsPatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StripeSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaypalSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ConfigurationPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying this patch changes payment provider settings.
    pub fn touches_payment_methods(&self) -> bool {
        self.payment_methods.is_some()
    }

    /// Whether applying this patch changes anything other than payment provider settings.
    pub fn touches_general_settings(&self) -> bool {
        self.app_name.is_some()
            || self.branding.is_some()
            || self.api_keys.is_some()
            || self.allow_registrations.is_some()
            || self.maintenance_mode.is_some()
    }
}

// ---------------------------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------------------------

fn pick<T: Clone>(patch: &Option<T>, current: &T) -> T {
    patch.as_ref().unwrap_or(current).clone()
}

impl Configuration {
    /// Produce a new record with `patch` applied on top of `self`.
    pub fn merged(&self, patch: &ConfigurationPatch) -> Configuration {
        Configuration {
            app_name: pick(&patch.app_name, &self.app_name),
            branding: self.branding.merged(patch.branding.as_ref()),
            api_keys: self.api_keys.merged(patch.api_keys.as_ref()),
            allow_registrations: pick(&patch.allow_registrations, &self.allow_registrations),
            maintenance_mode: pick(&patch.maintenance_mode, &self.maintenance_mode),
            payment_methods: self.payment_methods.merged(patch.payment_methods.as_ref()),
        }
    }

    /// Reconcile a stored document (possibly partial, possibly absent) against the defaults.
    pub fn from_stored(stored: Option<&ConfigurationPatch>) -> Configuration {
        match stored {
            Some(patch) => Configuration::default().merged(patch),
            None => Configuration::default(),
        }
    }
}

impl Branding {
    fn merged(&self, patch: Option<&BrandingPatch>) -> Branding {
        let Some(patch) = patch else {
            return self.clone();
        };
        Branding {
            logo: pick(&patch.logo, &self.logo),
            favicon: pick(&patch.favicon, &self.favicon),
        }
    }
}

impl ApiKeys {
    fn merged(&self, patch: Option<&ApiKeysPatch>) -> ApiKeys {
        let Some(patch) = patch else {
            return self.clone();
        };
        ApiKeys {
            google_gen_ai: self.google_gen_ai.merged(patch.google_gen_ai.as_ref()),
            veo: self.veo.merged(patch.veo.as_ref()),
        }
    }
}

impl ProviderKey {
    fn merged(&self, patch: Option<&ProviderKeyPatch>) -> ProviderKey {
        let Some(patch) = patch else {
            return self.clone();
        };
        ProviderKey {
            key: pick(&patch.key, &self.key),
            enabled: pick(&patch.enabled, &self.enabled),
        }
    }
}

impl PaymentMethods {
    fn merged(&self, patch: Option<&PaymentMethodsPatch>) -> PaymentMethods {
        let Some(patch) = patch else {
            return self.clone();
        };
        let stripe = match &patch.stripe {
            Some(stripe) => StripeSettings {
                enabled: pick(&stripe.enabled, &self.stripe.enabled),
                public_key: pick(&stripe.public_key, &self.stripe.public_key),
            },
            None => self.stripe.clone(),
        };
        let paypal = match &patch.paypal {
            Some(paypal) => PaypalSettings {
                enabled: pick(&paypal.enabled, &self.paypal.enabled),
                client_id: pick(&paypal.client_id, &self.paypal.client_id),
            },
            None => self.paypal.clone(),
        };
        PaymentMethods { stripe, paypal }
    }
}
