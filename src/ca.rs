//! On-demand self-signed certificate generation using rcgen.
//!
//! Each certificate is a leaf signed by its own freshly generated key, valid
//! from 30 days in the past (clock-skew tolerance) to 20 years in the future,
//! and name-constrained to exactly the requested host list. Generation
//! failures are fatal at startup; a broken crypto source is not transient,
//! so callers never retry.

use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, GeneralSubtree,
    KeyPair, KeyUsagePurpose, NameConstraints, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::config::Certificate;

/// Subject organization placeholder
const SUBJECT_ORGANIZATION: &str = "Organization";

/// Subject organizational unit placeholder
const SUBJECT_ORGANIZATIONAL_UNIT: &str = "Organizational Unit";

/// Clock-skew backdating applied to NotBefore
const VALIDITY_BACKDATE_DAYS: i64 = 30;

/// Certificate lifetime from now to NotAfter
const VALIDITY_YEARS: i64 = 20;

/// The result type for certificate generation.
pub type CaResult<T> = Result<T, CaError>;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("unsupported ECDSA curve size {0} (supported: 256, 384, 521)")]
    UnsupportedCurve(u16),
    #[error("unsupported RSA modulus size {0} (supported: 2048-8192)")]
    UnsupportedModulus(usize),
    #[error("failed to generate key pair: {0}")]
    KeyGeneration(#[source] rcgen::Error),
    #[error("failed to generate RSA key: {0}")]
    RsaKeyGeneration(#[source] rsa::Error),
    #[error("failed to encode RSA key: {0}")]
    RsaKeyEncoding(#[source] rsa::pkcs8::Error),
    #[error("failed to draw serial number: {0}")]
    SerialNumber(#[source] rand::Error),
    #[error("invalid constraint host name: {0}")]
    InvalidHostName(String),
    #[error("failed to build certificate: {0}")]
    CertificateConstruction(#[source] rcgen::Error),
}

/// Key algorithm and size for a generated certificate.
///
/// Caller-selected with no negotiation. ECDSA curves follow the NIST P
/// curves; RSA accepts any modulus size the TLS signer can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Ecdsa(u16),
    Rsa(usize),
}

/// Generates a fresh self-signed certificate for `name`, constrained to
/// exactly the `hosts` list, returning PEM-encoded material.
pub fn generate(name: &str, hosts: &[String], algorithm: KeyAlgorithm) -> CaResult<Certificate> {
    let key_pair = generate_key_pair(algorithm)?;

    // Uniformly random serial in [0, 2^128)
    let mut serial = [0u8; 16];
    rand::rngs::OsRng
        .try_fill_bytes(&mut serial)
        .map_err(CaError::SerialNumber)?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, SUBJECT_ORGANIZATION);
    dn.push(DnType::OrganizationalUnitName, SUBJECT_ORGANIZATIONAL_UNIT);
    dn.push(DnType::CommonName, name);

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.serial_number = Some(SerialNumber::from(serial.to_vec()));

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(VALIDITY_BACKDATE_DAYS);
    params.not_after = now + Duration::days(365 * VALIDITY_YEARS);

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    for host in hosts {
        params.subject_alt_names.push(SanType::DnsName(
            host.as_str()
                .try_into()
                .map_err(|_| CaError::InvalidHostName(host.clone()))?,
        ));
    }
    params.name_constraints = Some(NameConstraints {
        permitted_subtrees: hosts
            .iter()
            .map(|host| GeneralSubtree::DnsName(host.clone()))
            .collect(),
        excluded_subtrees: Vec::new(),
    });

    let cert = params
        .self_signed(&key_pair)
        .map_err(CaError::CertificateConstruction)?;

    debug!(host = %name, ?algorithm, "generated self-signed certificate");

    Ok(Certificate {
        certificate: cert.pem(),
        private_key: key_pair.serialize_pem(),
    })
}

/// Generates a key pair for the requested algorithm.
///
/// ECDSA keys come straight from rcgen. RSA keys are generated with the
/// `rsa` crate and imported as PKCS#8, since rcgen's backends only sign
/// with existing RSA keys. P-224 is rejected: the TLS stack cannot sign or
/// serve P-224 certificates.
fn generate_key_pair(algorithm: KeyAlgorithm) -> CaResult<KeyPair> {
    match algorithm {
        KeyAlgorithm::Ecdsa(256) => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(CaError::KeyGeneration)
        }
        KeyAlgorithm::Ecdsa(384) => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P384_SHA384).map_err(CaError::KeyGeneration)
        }
        KeyAlgorithm::Ecdsa(521) => {
            KeyPair::generate_for(&rcgen::PKCS_ECDSA_P521_SHA512).map_err(CaError::KeyGeneration)
        }
        KeyAlgorithm::Ecdsa(bits) => Err(CaError::UnsupportedCurve(bits)),
        KeyAlgorithm::Rsa(bits) => {
            if !(2048..=8192).contains(&bits) {
                return Err(CaError::UnsupportedModulus(bits));
            }
            let private_key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
                .map_err(CaError::RsaKeyGeneration)?;
            let der = private_key
                .to_pkcs8_der()
                .map_err(CaError::RsaKeyEncoding)?;
            let der = PrivatePkcs8KeyDer::from(der.as_bytes().to_vec());
            KeyPair::from_pkcs8_der_and_sign_algo(&der, &rcgen::PKCS_RSA_SHA256)
                .map_err(CaError::KeyGeneration)
        }
    }
}
