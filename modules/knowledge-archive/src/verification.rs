// Verification (anti-bot challenge) page detection.
//
// A document is checked against the signature set of the platform its URL
// belongs to, or against the generic set when no platform rule matches.
// Rules are data: built from the platform table by default, or loaded from JSON.

use std::path::Path;

use anyhow::{Context, Result};
use knowledge_common::platform::{self, GENERIC, PROFILES};
use knowledge_common::Platform;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationVerdict {
    pub is_blocked: bool,
    pub matched_signature: Option<String>,
    /// Platform whose rule set was consulted.
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSignatures {
    pub platform: Platform,
    pub host_patterns: Vec<String>,
    pub signatures: Vec<String>,
}

/// Full signature configuration. Serialized form of the detector's rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRules {
    pub platforms: Vec<PlatformSignatures>,
    pub generic: Vec<String>,
}

impl Default for SignatureRules {
    /// Rules taken from the built-in platform table. Platforms without
    /// signatures of their own are left to the generic set.
    fn default() -> Self {
        let platforms = PROFILES
            .iter()
            .filter(|p| !p.verification_signatures.is_empty())
            .map(|p| PlatformSignatures {
                platform: p.platform,
                host_patterns: p.host_patterns.iter().map(|s| s.to_string()).collect(),
                signatures: p
                    .verification_signatures
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            })
            .collect();
        Self {
            platforms,
            generic: GENERIC
                .verification_signatures
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

pub struct VerificationDetector {
    rules: SignatureRules,
}

impl VerificationDetector {
    pub fn new(mut rules: SignatureRules) -> Self {
        for entry in &mut rules.platforms {
            lowercase_all(&mut entry.signatures);
            lowercase_all(&mut entry.host_patterns);
        }
        lowercase_all(&mut rules.generic);
        Self { rules }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let rules: SignatureRules =
            serde_json::from_str(json).context("Invalid verification rules JSON")?;
        Ok(Self::new(rules))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read verification rules {}", path.display()))?;
        let detector = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            platforms = detector.rules.platforms.len(),
            "Loaded verification rules"
        );
        Ok(detector)
    }

    pub fn rules(&self) -> &SignatureRules {
        &self.rules
    }

    pub fn detect(&self, raw_document: &str, source_url: &str) -> VerificationVerdict {
        let (platform, signatures) = self.signatures_for(source_url);
        let lowered = raw_document.to_lowercase();

        let matched = signatures
            .iter()
            .find(|sig| !sig.is_empty() && lowered.contains(sig.as_str()))
            .cloned();

        VerificationVerdict {
            is_blocked: matched.is_some(),
            matched_signature: matched,
            platform,
        }
    }

    fn signatures_for(&self, source_url: &str) -> (Platform, &[String]) {
        if let Some(host) = platform::host_of(source_url) {
            let entry = self.rules.platforms.iter().find(|entry| {
                entry
                    .host_patterns
                    .iter()
                    .any(|p| host == *p || host.ends_with(&format!(".{p}")))
            });
            if let Some(entry) = entry {
                return (entry.platform, &entry.signatures);
            }
        }
        (Platform::Generic, &self.rules.generic)
    }
}

impl Default for VerificationDetector {
    fn default() -> Self {
        Self::new(SignatureRules::default())
    }
}

fn lowercase_all(values: &mut [String]) {
    for v in values.iter_mut() {
        *v = v.to_lowercase();
    }
}
