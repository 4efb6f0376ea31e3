use hudsucker::{certificate_authority::RcgenAuthority, rustls};
use rcgen::{
    BasicConstraints,
    Certificate,
    CertificateParams,
    DistinguishedName,
    DnType,
    IsCa,
    KeyPair,
    KeyUsagePurpose
};
use rustls_pemfile::Item;
use std::{fs, path::{Path, PathBuf}};
use log::debug;

use crate::utils::MidnightError;

const EMBEDDED_CA_CERT: &str = include_str!("../assets/ca_cert.pem");
const EMBEDDED_CA_KEY: &str = include_str!("../assets/ca_key.pem");

pub const CA_CERT_FILE: &str = "ca_cert.pem";
pub const CA_KEY_FILE: &str = "ca_key.pem";

/// CA certificate and private key used to mint leaf certificates for intercepted hosts.
/// Loaded once at startup, never modified afterwards.
#[derive(Clone)]
pub struct CaMaterial {
    cert_pem: String,
    cert_der: Vec<u8>,
    key_der: Vec<u8>
}

impl CaMaterial {
    /// CA shipped inside the binary
    pub fn load() -> Result<Self, MidnightError> {
        Self::from_pem(EMBEDDED_CA_CERT, EMBEDDED_CA_KEY)
    }

    pub fn from_files(cert_path: &str, key_path: &str) -> Result<Self, MidnightError> {
        let cert_pem = fs::read_to_string(cert_path)
            .map_err(|e| MidnightError::IOError(format!("Could not read cer file '{}', info: {}", cert_path, e)))?;
        let key_pem = fs::read_to_string(key_path)
            .map_err(|e| MidnightError::IOError(format!("Could not read key file '{}', info: {}", key_path, e)))?;

        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, MidnightError> {
        let cert_der = read_pem_items(cert_pem)?
            .into_iter()
            .find_map(|item| match item {
                Item::X509Certificate(der) => Some(der),
                _ => None
            })
            .ok_or(MidnightError::CertificateError("No certificate found in CA PEM".to_string()))?;

        let key_der = read_pem_items(key_pem)?
            .into_iter()
            .find_map(|item| match item {
                Item::PKCS8Key(der) | Item::RSAKey(der) | Item::ECKey(der) => Some(der),
                _ => None
            })
            .ok_or(MidnightError::CertificateError("No private key found in CA key PEM".to_string()))?;

        // Same parsing hudsucker does when building the authority, done here so that
        // broken material is reported before anything starts listening.
        let key_pair = KeyPair::from_der(&key_der)?;
        let params = CertificateParams::from_ca_cert_der(&cert_der, key_pair)?;
        debug!("CA loaded, subject: {:?}", params.distinguished_name.get(&DnType::CommonName));

        Ok(
            CaMaterial {
                cert_pem: cert_pem.to_string(),
                cert_der,
                key_der
            }
        )
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn authority(&self, cache_size: u64) -> Result<RcgenAuthority, MidnightError> {
        RcgenAuthority::new(
            rustls::PrivateKey(self.key_der.clone()),
            rustls::Certificate(self.cert_der.clone()),
            cache_size
        )
        .map_err(|e| MidnightError::CertificateError(format!("Failed to create CA authority: {}", e)))
    }
}

fn read_pem_items(pem: &str) -> Result<Vec<Item>, MidnightError> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::read_all(&mut reader)
        .map_err(|e| MidnightError::CertificateError(format!("Malformed PEM: {}", e)))
}

// ---------------------------------------------------------------------------------------------- //

/// Fresh self-signed CA as `(cert_pem, key_pem)`
pub fn generate_pem() -> Result<(String, String), MidnightError> {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Midnight Proxy CA");
    dn.push(DnType::OrganizationName, "Midnight Proxy");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign
    ];

    let cert = Certificate::from_params(params)?;
    Ok((cert.serialize_pem()?, cert.serialize_private_key_pem()))
}

pub fn write_generated(dir: &Path) -> Result<(PathBuf, PathBuf), MidnightError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    let cert_path = dir.join(CA_CERT_FILE);
    let key_path = dir.join(CA_KEY_FILE);
    if cert_path.exists() || key_path.exists() {
        return Err(
            MidnightError::CertificateError(format!("Refusing to overwrite CA files in '{}'", dir.display()))
        );
    }

    let (cert_pem, key_pem) = generate_pem()?;
    fs::write(&cert_path, cert_pem.as_bytes())?;
    fs::write(&key_path, key_pem.as_bytes())?;

    Ok((cert_path, key_path))
}

// ---------------------------------------------------------------------------------------------- //
