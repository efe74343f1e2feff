//! # Certificate Validation
//!
//! Issues and renews the webhook CA and serving certificate.
//!
//! Renewal happens [`CERT_RENEWAL_THRESHOLD`] before NotAfter. A renewed CA
//! always drags a new serving certificate with it. When nothing needs
//! renewal the output bundle is byte-identical to the input.

use crate::constants::{
    CA_CERT_KEY, CA_KEY_KEY, CA_VALIDITY_DAYS, CERT_RENEWAL_THRESHOLD, DEFAULT_RSA_KEY_BITS,
    TLS_CERT_KEY, TLS_KEY_KEY, TLS_VALIDITY_DAYS,
};
use chrono::{DateTime, Utc};
use k8s_openapi::ByteString;
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, PKCS_RSA_SHA256, SanType,
    SerialNumber, string::Ia5String,
};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use std::collections::BTreeMap;
use thiserror::Error;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("certificate generation failed: {0}")]
    Certificate(String),
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("invalid certificate domain '{0}'")]
    InvalidDomain(String),
}

impl CertError {
    pub fn is_config(&self) -> bool {
        matches!(self, Self::InvalidDomain(_))
    }
}

/// PEM material keyed by `ca.crt`, `ca.key`, `tls.crt`, `tls.key`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertBundle(BTreeMap<String, Vec<u8>>);

impl CertBundle {
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn insert(&mut self, key: &str, value: Vec<u8>) {
        self.0.insert(key.to_string(), value);
    }

    pub fn ca_cert(&self) -> Option<&[u8]> {
        self.get(CA_CERT_KEY)
    }

    pub fn tls_cert(&self) -> Option<&[u8]> {
        self.get(TLS_CERT_KEY)
    }

    pub fn tls_key(&self) -> Option<&[u8]> {
        self.get(TLS_KEY_KEY)
    }

    /// Bundle from secret data
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Self {
        Self(
            data.iter()
                .map(|(k, v)| (k.clone(), v.0.clone()))
                .collect(),
        )
    }

    /// Secret data holding the bundle
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
            .collect()
    }
}

/// Result of a validation pass
#[derive(Debug, Clone)]
pub struct ValidatedCerts {
    pub bundle: CertBundle,
    pub ca_changed: bool,
    pub tls_changed: bool,
}

impl ValidatedCerts {
    pub fn changed(&self) -> bool {
        self.ca_changed || self.tls_changed
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CertValidator {
    key_bits: usize,
}

impl Default for CertValidator {
    fn default() -> Self {
        Self {
            key_bits: DEFAULT_RSA_KEY_BITS,
        }
    }
}

impl CertValidator {
    /// Validator generating keys of `key_bits` (at least 2048)
    pub fn with_key_bits(key_bits: usize) -> Self {
        Self { key_bits }
    }

    /// Check `src` against `now` and renew what is missing, unparseable or expiring
    pub fn validate(
        &self,
        src: Option<&CertBundle>,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedCerts, CertError> {
        let dns_name = Ia5String::try_from(domain.to_string())
            .ok()
            .filter(|_| !domain.is_empty())
            .ok_or_else(|| CertError::InvalidDomain(domain.to_string()))?;

        let mut bundle = src.cloned().unwrap_or_default();
        let now_ts = now.timestamp();

        let ca_usable = bundle
            .get(CA_CERT_KEY)
            .and_then(not_after)
            .is_some_and(|expiry| !needs_renewal(expiry, now_ts))
            && bundle.get(CA_KEY_KEY).and_then(decode_key).is_some();
        let ca_changed = !ca_usable;
        if ca_changed {
            tracing::info!(domain = %domain, "Generating new webhook CA certificate");
            let (cert_pem, key_pem) = self.generate_ca(domain, now_ts)?;
            bundle.insert(CA_CERT_KEY, cert_pem.into_bytes());
            bundle.insert(CA_KEY_KEY, key_pem.into_bytes());
        }

        let tls_usable = bundle
            .get(TLS_CERT_KEY)
            .and_then(not_after)
            .is_some_and(|expiry| !needs_renewal(expiry, now_ts))
            && bundle.get(TLS_KEY_KEY).and_then(decode_key).is_some();
        let tls_changed = ca_changed || !tls_usable;
        if tls_changed {
            tracing::info!(domain = %domain, "Generating new webhook serving certificate");
            let (cert_pem, key_pem) = self.generate_tls(&bundle, dns_name, now_ts)?;
            bundle.insert(TLS_CERT_KEY, cert_pem.into_bytes());
            bundle.insert(TLS_KEY_KEY, key_pem.into_bytes());
        }

        Ok(ValidatedCerts {
            bundle,
            ca_changed,
            tls_changed,
        })
    }

    fn generate_ca(&self, domain: &str, now_ts: i64) -> Result<(String, String), CertError> {
        let (key, key_pair) = self.generate_key()?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(domain.to_string()));
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(random_serial());
        set_validity(&mut params, now_ts, CA_VALIDITY_DAYS)?;

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CertError::Certificate(format!("failed to self-sign CA: {e}")))?;
        Ok((cert.pem(), encode_key(&key)?))
    }

    fn generate_tls(
        &self,
        bundle: &CertBundle,
        dns_name: Ia5String,
        now_ts: i64,
    ) -> Result<(String, String), CertError> {
        let ca_cert = bundle
            .get(CA_CERT_KEY)
            .and_then(|pem| std::str::from_utf8(pem).ok())
            .ok_or_else(|| CertError::Encoding("CA certificate is not PEM".to_string()))?;
        let ca_key = bundle
            .get(CA_KEY_KEY)
            .and_then(decode_key)
            .ok_or_else(|| CertError::Encoding("CA key is not PKCS#1 PEM".to_string()))?;
        let ca_key_pair = signing_key_pair(&ca_key)?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert, &ca_key_pair)
            .map_err(|e| CertError::Certificate(format!("failed to load CA issuer: {e}")))?;

        let (key, key_pair) = self.generate_key()?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(dns_name.as_str().to_string()));
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.subject_alt_names = vec![SanType::DnsName(dns_name)];
        params.key_usages = vec![
            KeyUsagePurpose::KeyEncipherment,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(random_serial());
        set_validity(&mut params, now_ts, TLS_VALIDITY_DAYS)?;

        let cert = params
            .signed_by(&key_pair, &issuer)
            .map_err(|e| CertError::Certificate(format!("failed to sign serving cert: {e}")))?;
        Ok((cert.pem(), encode_key(&key)?))
    }

    fn generate_key(&self) -> Result<(RsaPrivateKey, KeyPair), CertError> {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, self.key_bits)
            .map_err(|e| CertError::KeyGeneration(e.to_string()))?;
        let key_pair = signing_key_pair(&key)?;
        Ok((key, key_pair))
    }
}

/// NotAfter of a PEM certificate as unix seconds
pub fn not_after(pem_bytes: &[u8]) -> Option<i64> {
    parse_validity(pem_bytes).map(|(_, after)| after)
}

/// NotBefore of a PEM certificate as unix seconds
pub fn not_before(pem_bytes: &[u8]) -> Option<i64> {
    parse_validity(pem_bytes).map(|(before, _)| before)
}

fn parse_validity(pem_bytes: &[u8]) -> Option<(i64, i64)> {
    let block = ::pem::parse(pem_bytes).ok()?;
    let (_, cert) = X509Certificate::from_der(block.contents()).ok()?;
    let validity = cert.validity();
    Some((validity.not_before.timestamp(), validity.not_after.timestamp()))
}

fn needs_renewal(not_after: i64, now_ts: i64) -> bool {
    let threshold = i64::try_from(CERT_RENEWAL_THRESHOLD.as_secs()).unwrap_or(i64::MAX);
    now_ts >= not_after.saturating_sub(threshold)
}

/// PKCS#1 key, `None` on any decode failure
fn decode_key(pem_bytes: &[u8]) -> Option<RsaPrivateKey> {
    let pem_str = std::str::from_utf8(pem_bytes).ok()?;
    RsaPrivateKey::from_pkcs1_pem(pem_str).ok()
}

fn encode_key(key: &RsaPrivateKey) -> Result<String, CertError> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|e| CertError::Encoding(format!("failed to encode PKCS#1 key: {e}")))
}

/// rcgen signs from PKCS#8
fn signing_key_pair(key: &RsaPrivateKey) -> Result<KeyPair, CertError> {
    let pkcs8 = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CertError::Encoding(format!("failed to encode PKCS#8 key: {e}")))?;
    KeyPair::from_pem_and_sign_algo(&pkcs8, &PKCS_RSA_SHA256)
        .map_err(|e| CertError::KeyGeneration(format!("failed to load signing key: {e}")))
}

/// 128 random bits with the top bit cleared
fn random_serial() -> SerialNumber {
    let mut bytes = vec![0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes)
}

fn set_validity(params: &mut CertificateParams, now_ts: i64, days: i64) -> Result<(), CertError> {
    let not_before = ::time::OffsetDateTime::from_unix_timestamp(now_ts)
        .map_err(|e| CertError::Certificate(format!("invalid NotBefore: {e}")))?;
    params.not_before = not_before;
    params.not_after = not_before + ::time::Duration::days(days);
    Ok(())
}
