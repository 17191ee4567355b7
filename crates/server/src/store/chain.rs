use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::der_parser::asn1_rs::oid;
use x509_parser::error::X509Error;
use x509_parser::prelude::{ASN1Time, FromDer};

pub const EXPECTED_CHAIN_LENGTH: usize = 3;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("chain must contain exactly {EXPECTED_CHAIN_LENGTH} certificates")]
    InvalidChainLength,

    #[error("certificate could not be parsed")]
    InvalidCertificate,

    #[error("certificate is missing the expected Apple marker extension")]
    MissingAppleMarker,

    #[error("certificate issuer does not match the next certificate in the chain")]
    InvalidIssuer,

    #[error("certificate is outside its validity window")]
    CertificateExpired,

    #[error("no pinned root certificate is configured")]
    NoPinnedRoot,

    #[error("signature verification failed: {0}")]
    Signature(#[from] X509Error),
}

/// Validates an x5c chain (leaf, intermediate, root) against pinned Apple
/// root CAs and returns the leaf's subject public key (DER SPKI data).
pub struct ChainVerifier {
    root_certificates: Vec<Vec<u8>>,
}

impl ChainVerifier {
    pub fn new(root_certificates: Vec<Vec<u8>>) -> Self {
        Self { root_certificates }
    }

    pub fn verify(
        &self,
        chain: &[Vec<u8>],
        effective_date: i64,
    ) -> Result<Vec<u8>, ChainError> {
        if self.root_certificates.is_empty() {
            return Err(ChainError::NoPinnedRoot);
        }
        if chain.len() != EXPECTED_CHAIN_LENGTH {
            return Err(ChainError::InvalidChainLength);
        }

        let (_, leaf) =
            X509Certificate::from_der(&chain[0]).map_err(|_| ChainError::InvalidCertificate)?;
        let (_, intermediate) =
            X509Certificate::from_der(&chain[1]).map_err(|_| ChainError::InvalidCertificate)?;

        // Apple marks receipt-signing leaves and the WWDR intermediate with
        // dedicated extension OIDs; a chain without them is not an App Store
        // chain even if signatures verify.
        if leaf
            .get_extension_unique(&oid!(1.2.840.113635.100.6.11.1))?
            .is_none()
        {
            return Err(ChainError::MissingAppleMarker);
        }
        if intermediate
            .get_extension_unique(&oid!(1.2.840.113635.100.6.2.1))?
            .is_none()
        {
            return Err(ChainError::MissingAppleMarker);
        }

        if leaf.issuer() != intermediate.subject() {
            return Err(ChainError::InvalidIssuer);
        }

        let at = ASN1Time::from_timestamp(effective_date)
            .map_err(|_| ChainError::CertificateExpired)?;
        if !leaf.validity().is_valid_at(at) || !intermediate.validity().is_valid_at(at) {
            return Err(ChainError::CertificateExpired);
        }

        // The intermediate must chain to one of the pinned roots.
        let mut verified_root = false;
        for root_der in &self.root_certificates {
            let Ok((_, root)) = X509Certificate::from_der(root_der) else {
                continue;
            };
            if intermediate.issuer() != root.subject() {
                continue;
            }
            if !root.validity().is_valid_at(at) {
                return Err(ChainError::CertificateExpired);
            }
            if intermediate
                .verify_signature(Some(root.public_key()))
                .is_ok()
            {
                verified_root = true;
                break;
            }
        }
        if !verified_root {
            return Err(ChainError::InvalidIssuer);
        }

        leaf.verify_signature(Some(intermediate.public_key()))?;

        Ok(leaf
            .public_key()
            .subject_public_key
            .data
            .to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, CustomExtension, DnType, IsCa, KeyPair};

    const LEAF_MARKER: &[u64] = &[1, 2, 840, 113635, 100, 6, 11, 1];
    const INTERMEDIATE_MARKER: &[u64] = &[1, 2, 840, 113635, 100, 6, 2, 1];
    // ASN.1 NULL; the verifier only checks presence.
    const MARKER_CONTENT: [u8; 2] = [0x05, 0x00];

    struct TestChain {
        leaf: Vec<u8>,
        intermediate: Vec<u8>,
        root: Vec<u8>,
    }

    impl TestChain {
        fn certs(&self) -> Vec<Vec<u8>> {
            vec![self.leaf.clone(), self.intermediate.clone(), self.root.clone()]
        }
    }

    /// Leaf signed by intermediate signed by root, ECDSA P-256, with the
    /// marker extensions unless `with_markers` is off.
    fn generate_chain(with_markers: bool) -> TestChain {
        let root_key = KeyPair::generate().unwrap();
        let mut root_params = CertificateParams::new(vec![]).unwrap();
        root_params
            .distinguished_name
            .push(DnType::CommonName, "Test Root CA");
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let root = root_params.self_signed(&root_key).unwrap();

        let intermediate_key = KeyPair::generate().unwrap();
        let mut intermediate_params = CertificateParams::new(vec![]).unwrap();
        intermediate_params
            .distinguished_name
            .push(DnType::CommonName, "Test Intermediate CA");
        intermediate_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        if with_markers {
            intermediate_params.custom_extensions = vec![CustomExtension::from_oid_content(
                INTERMEDIATE_MARKER,
                MARKER_CONTENT.to_vec(),
            )];
        }
        let intermediate = intermediate_params
            .signed_by(&intermediate_key, &root, &root_key)
            .unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![]).unwrap();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, "Test Leaf");
        if with_markers {
            leaf_params.custom_extensions = vec![CustomExtension::from_oid_content(
                LEAF_MARKER,
                MARKER_CONTENT.to_vec(),
            )];
        }
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .unwrap();

        TestChain {
            leaf: leaf.der().to_vec(),
            intermediate: intermediate.der().to_vec(),
            root: root.der().to_vec(),
        }
    }

    #[test]
    fn test_well_formed_chain_verifies() {
        let chain = generate_chain(true);
        let verifier = ChainVerifier::new(vec![chain.root.clone()]);

        let spki = verifier.verify(&chain.certs(), 1_700_000_000).unwrap();
        // Uncompressed P-256 point: 0x04 || x || y.
        assert_eq!(spki.len(), 65);
        assert_eq!(spki[0], 0x04);
    }

    #[test]
    fn test_chain_without_apple_markers_rejected() {
        let chain = generate_chain(false);
        let verifier = ChainVerifier::new(vec![chain.root.clone()]);

        assert!(matches!(
            verifier.verify(&chain.certs(), 1_700_000_000),
            Err(ChainError::MissingAppleMarker)
        ));
    }

    #[test]
    fn test_chain_against_foreign_root_rejected() {
        let chain = generate_chain(true);
        let other = generate_chain(true);
        let verifier = ChainVerifier::new(vec![other.root.clone()]);

        assert!(matches!(
            verifier.verify(&chain.certs(), 1_700_000_000),
            Err(ChainError::InvalidIssuer)
        ));
    }

    #[test]
    fn test_empty_roots_rejected() {
        let verifier = ChainVerifier::new(vec![]);
        let chain = vec![vec![0u8; 4], vec![0u8; 4], vec![0u8; 4]];
        assert!(matches!(
            verifier.verify(&chain, 1_700_000_000),
            Err(ChainError::NoPinnedRoot)
        ));
    }

    #[test]
    fn test_wrong_chain_length_rejected() {
        let verifier = ChainVerifier::new(vec![vec![0u8; 4]]);
        let chain = vec![vec![0u8; 4], vec![0u8; 4]];
        assert!(matches!(
            verifier.verify(&chain, 1_700_000_000),
            Err(ChainError::InvalidChainLength)
        ));
    }

    #[test]
    fn test_garbage_certificates_rejected() {
        let verifier = ChainVerifier::new(vec![vec![0u8; 4]]);
        let chain = vec![vec![1u8; 8], vec![2u8; 8], vec![3u8; 8]];
        assert!(matches!(
            verifier.verify(&chain, 1_700_000_000),
            Err(ChainError::InvalidCertificate)
        ));
    }
}
