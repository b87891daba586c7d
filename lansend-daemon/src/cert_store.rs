//! Self-signed certificate lifecycle and fingerprint pinning.
//!
//! The store owns exactly one key pair + certificate, created on first
//! run and loaded from disk thereafter, plus the map of pinned peer
//! fingerprints consulted on every TLS handshake.
//!
//! A fingerprint is the lowercase hex SHA-256 of the certificate's PEM
//! encoding. Certificates observed as DER at handshake time are
//! re-encoded through [`der_to_pem`] so both sides hash identical bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{info, warn};

use lansend_common::{atomic_write, sha256_hex};

use crate::error::{Error, Result};
use crate::platform;

const PRIVATE_KEY_FILE: &str = "private_key.pem";
const PUBLIC_KEY_FILE: &str = "public_key.pem";
const CERTIFICATE_FILE: &str = "certificate.pem";
const FINGERPRINT_FILE: &str = "fingerprint.txt";

const CERT_VALIDITY_DAYS: i64 = 3650;

/// Our own key material, held in memory for the process lifetime.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    pub private_key_pem: String,
    pub public_key_pem: String,
    pub certificate_pem: String,
    pub fingerprint: String,
}

#[derive(Debug)]
pub struct CertificateStore {
    certs_dir: PathBuf,
    context: SecurityContext,
    cert_der: CertificateDer<'static>,
    pinned: Mutex<HashMap<String, String>>,
    allow_unregistered: AtomicBool,
}

impl CertificateStore {
    /// Load the security context from `certs_dir`, generating and
    /// persisting a fresh one if any of the four files is missing.
    /// Failures here are fatal at startup.
    pub fn init<P: AsRef<Path>>(certs_dir: P) -> Result<Self> {
        let certs_dir = certs_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&certs_dir)?;

        let context = match load_security_context(&certs_dir)? {
            Some(context) => {
                info!(
                    "loaded certificate with fingerprint {}...",
                    &context.fingerprint[..8]
                );
                context
            }
            None => {
                let context = generate_security_context()?;
                save_security_context(&certs_dir, &context)?;
                info!(
                    "generated self-signed certificate with fingerprint {}...",
                    &context.fingerprint[..8]
                );
                context
            }
        };

        let cert_der = pem_to_der(&context.certificate_pem)?;

        Ok(Self {
            certs_dir,
            context,
            cert_der,
            pinned: Mutex::new(HashMap::new()),
            allow_unregistered: AtomicBool::new(false),
        })
    }

    pub fn security_context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn fingerprint(&self) -> &str {
        &self.context.fingerprint
    }

    pub fn certs_dir(&self) -> &Path {
        &self.certs_dir
    }

    /// Our certificate chain and key in the forms rustls wants.
    pub fn certified_key(&self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let mut reader = std::io::BufReader::new(self.context.private_key_pem.as_bytes());
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|e| Error::Fatal(format!("unreadable private key: {}", e)))?
            .ok_or_else(|| Error::Fatal("no private key in security context".into()))?;
        Ok((vec![self.cert_der.clone()], key))
    }

    /// Pure SHA-256 over the PEM bytes, rendered as lowercase hex.
    pub fn fingerprint_of(pem: &str) -> String {
        sha256_hex(pem.as_bytes())
    }

    /// Pin `fingerprint` for `{ip}:{port}`. Overwriting a different
    /// fingerprint is allowed (the caller has user confirmation) but
    /// returns the old value so a warning can be surfaced.
    pub fn pin(&self, ip: &str, port: u16, fingerprint: &str) -> Option<String> {
        let key = endpoint_key(ip, port);
        let mut pinned = self.pinned.lock().unwrap();
        let previous = pinned.insert(key.clone(), fingerprint.to_string());

        match &previous {
            Some(old) if old != fingerprint => {
                warn!(
                    "fingerprint for {} changed from {}... to {}...",
                    key,
                    &old[..8.min(old.len())],
                    &fingerprint[..8.min(fingerprint.len())]
                );
                previous
            }
            _ => {
                info!("pinned fingerprint for {}: {}...", key, &fingerprint[..8.min(fingerprint.len())]);
                None
            }
        }
    }

    pub fn unpin(&self, ip: &str, port: u16) {
        let key = endpoint_key(ip, port);
        if self.pinned.lock().unwrap().remove(&key).is_some() {
            info!("removed pinned fingerprint for {}", key);
        }
    }

    pub fn expected_fingerprint(&self, ip: &str, port: u16) -> Option<String> {
        self.pinned
            .lock()
            .unwrap()
            .get(&endpoint_key(ip, port))
            .cloned()
    }

    pub fn set_allow_unregistered(&self, allow: bool) {
        self.allow_unregistered.store(allow, Ordering::Relaxed);
    }

    pub fn allow_unregistered(&self) -> bool {
        self.allow_unregistered.load(Ordering::Relaxed)
    }

    /// The per-handshake verification decision, for either TLS role.
    ///
    /// A pinned endpoint must present exactly the pinned certificate;
    /// an unpinned endpoint passes only under the allow-unregistered
    /// policy. Chain preverification is never trusted on its own.
    pub fn verify_peer(&self, ip: &str, port: u16, peer_cert_der: &[u8]) -> Result<()> {
        let peer = endpoint_key(ip, port);
        let actual = Self::fingerprint_of(&der_to_pem(peer_cert_der));

        if let Some(expected) = self.expected_fingerprint(ip, port) {
            if expected == actual {
                info!("verified pinned fingerprint for {}: {}...", peer, &actual[..8]);
                return Ok(());
            }
            warn!(
                "fingerprint mismatch for {}: expected {}..., got {}...",
                peer,
                &expected[..8],
                &actual[..8]
            );
            return Err(Error::tls(
                peer,
                format!(
                    "certificate fingerprint mismatch (expected {}, got {})",
                    expected, actual
                ),
            ));
        }

        if self.allow_unregistered() {
            warn!("unpinned peer {} accepted, fingerprint {}...", peer, &actual[..8]);
            return Ok(());
        }

        Err(Error::tls(
            peer,
            format!("no pinned fingerprint and unregistered peers are not allowed (presented {})", actual),
        ))
    }

    /// Verification for inbound handshakes. The remote port of an
    /// incoming connection is ephemeral, so pins are matched by IP: if
    /// any fingerprint is pinned for `ip`, the presented certificate
    /// must match one of them; otherwise the unregistered policy
    /// decides.
    pub fn verify_inbound(&self, ip: &str, remote_port: u16, peer_cert_der: &[u8]) -> Result<()> {
        let peer = endpoint_key(ip, remote_port);
        let actual = Self::fingerprint_of(&der_to_pem(peer_cert_der));

        let pinned_for_ip: Vec<String> = {
            let pinned = self.pinned.lock().unwrap();
            pinned
                .iter()
                .filter(|(key, _)| key.rsplit_once(':').map(|(host, _)| host) == Some(ip))
                .map(|(_, fp)| fp.clone())
                .collect()
        };

        if !pinned_for_ip.is_empty() {
            if pinned_for_ip.iter().any(|fp| *fp == actual) {
                info!("verified pinned fingerprint for inbound peer {}", peer);
                return Ok(());
            }
            warn!("inbound fingerprint mismatch for {}", peer);
            return Err(Error::tls(
                peer,
                format!("certificate fingerprint mismatch (got {})", actual),
            ));
        }

        if self.allow_unregistered() {
            warn!("unpinned inbound peer {} accepted, fingerprint {}...", peer, &actual[..8]);
            return Ok(());
        }

        Err(Error::tls(
            peer,
            format!("no pinned fingerprint and unregistered peers are not allowed (presented {})", actual),
        ))
    }
}

fn endpoint_key(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}

/// Render a DER certificate as PEM with a 64-column base64 body. This
/// exact formatting is part of the fingerprint contract.
pub fn der_to_pem(der: &[u8]) -> String {
    let encoded = BASE64.encode(der);
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(line).expect("base64 is ascii"));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

fn pem_to_der(pem: &str) -> Result<CertificateDer<'static>> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let cert = rustls_pemfile::certs(&mut reader)
        .next()
        .transpose()
        .map_err(|e| Error::Fatal(format!("unreadable certificate PEM: {}", e)))?
        .ok_or_else(|| Error::Fatal("no certificate in PEM".into()));
    cert
}

fn generate_security_context() -> Result<SecurityContext> {
    let host = platform::local_hostname();

    let key_pair = KeyPair::generate()
        .map_err(|e| Error::Fatal(format!("key generation failed: {}", e)))?;

    let mut params = CertificateParams::new(vec![host.clone(), "localhost".to_string()])
        .map_err(|e| Error::Fatal(format!("invalid certificate params: {}", e)))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    dn.push(DnType::OrganizationName, "LanSend");
    dn.push(DnType::OrganizationalUnitName, "Self-Signed");
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(CERT_VALIDITY_DAYS);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Fatal(format!("certificate signing failed: {}", e)))?;

    // Canonical PEM comes from our own encoder so fingerprints agree
    // with what peers compute from the DER they observe.
    let certificate_pem = der_to_pem(cert.der());
    let fingerprint = sha256_hex(certificate_pem.as_bytes());

    Ok(SecurityContext {
        private_key_pem: key_pair.serialize_pem(),
        public_key_pem: key_pair.public_key_pem(),
        certificate_pem,
        fingerprint,
    })
}

fn save_security_context(certs_dir: &Path, context: &SecurityContext) -> Result<()> {
    atomic_write(
        certs_dir.join(PRIVATE_KEY_FILE),
        context.private_key_pem.as_bytes(),
    )?;
    atomic_write(
        certs_dir.join(PUBLIC_KEY_FILE),
        context.public_key_pem.as_bytes(),
    )?;
    atomic_write(
        certs_dir.join(CERTIFICATE_FILE),
        context.certificate_pem.as_bytes(),
    )?;
    atomic_write(
        certs_dir.join(FINGERPRINT_FILE),
        context.fingerprint.as_bytes(),
    )?;
    Ok(())
}

fn load_security_context(certs_dir: &Path) -> Result<Option<SecurityContext>> {
    let paths = [
        certs_dir.join(PRIVATE_KEY_FILE),
        certs_dir.join(PUBLIC_KEY_FILE),
        certs_dir.join(CERTIFICATE_FILE),
        certs_dir.join(FINGERPRINT_FILE),
    ];
    if paths.iter().any(|p| !p.exists()) {
        return Ok(None);
    }

    let private_key_pem = std::fs::read_to_string(&paths[0])?;
    let public_key_pem = std::fs::read_to_string(&paths[1])?;
    let certificate_pem = std::fs::read_to_string(&paths[2])?;

    // The fingerprint is derived state; recompute rather than trust the
    // stored copy, which exists for external tooling.
    let fingerprint = sha256_hex(certificate_pem.as_bytes());
    let stored = std::fs::read_to_string(&paths[3])?;
    if stored.trim() != fingerprint {
        warn!("stored fingerprint differs from certificate, using recomputed value");
    }

    if private_key_pem.is_empty() || certificate_pem.is_empty() {
        return Ok(None);
    }

    Ok(Some(SecurityContext {
        private_key_pem,
        public_key_pem,
        certificate_pem,
        fingerprint,
    }))
}
