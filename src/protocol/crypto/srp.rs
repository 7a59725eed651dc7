use super::{CryptoError, lengths};
use num_bigint::{BigUint, RandomBits};
use num_traits::Zero;
use rand::Rng;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

/// SRP username used by every HAP Pair-Setup
pub const SRP_USERNAME: &[u8] = b"Pair-Setup";

const N_3072_HEX: &[u8] = b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08\
      8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B\
      302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9\
      A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6\
      49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8\
      FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D\
      670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C\
      180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
      3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D\
      04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D\
      B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226\
      1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
      BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC\
      E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

/// RFC 5054 3072-bit group with SHA-512, as used by HAP
struct SrpGroup {
    n: BigUint,
    g: BigUint,
    k: BigUint,
}

impl SrpGroup {
    fn rfc5054_3072() -> Result<Self, CryptoError> {
        // The hex literal is split over lines; drop the whitespace first.
        let hex: Vec<u8> = N_3072_HEX
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let n = BigUint::parse_bytes(&hex, 16)
            .ok_or_else(|| CryptoError::SrpError("Failed to parse N".to_string()))?;
        let g = BigUint::from(5u32);

        // k = H(N, pad(g))
        let k = {
            let mut hasher = Sha512::new();
            hasher.update(n.to_bytes_be());
            hasher.update(pad(&g));
            BigUint::from_bytes_be(&hasher.finalize())
        };

        Ok(Self { n, g, k })
    }

    /// x = H(salt, H(username, ":", password))
    fn compute_x(username: &[u8], password: &[u8], salt: &[u8]) -> BigUint {
        let mut inner = Sha512::new();
        inner.update(username);
        inner.update(b":");
        inner.update(password);
        let h_up = inner.finalize();

        let mut outer = Sha512::new();
        outer.update(salt);
        outer.update(h_up);
        BigUint::from_bytes_be(&outer.finalize())
    }

    /// u = H(pad(A), pad(B))
    fn compute_u(a_pub: &[u8], b_pub: &[u8]) -> BigUint {
        let mut hasher = Sha512::new();
        hasher.update(pad_bytes(a_pub));
        hasher.update(pad_bytes(b_pub));
        BigUint::from_bytes_be(&hasher.finalize())
    }

    /// M1 = H(H(N) ^ H(g), H(username), salt, A, B, K)
    fn compute_m1(
        &self,
        username: &[u8],
        salt: &[u8],
        a_pub: &[u8],
        b_pub: &[u8],
        key: &[u8],
    ) -> Vec<u8> {
        let hn = Sha512::digest(self.n.to_bytes_be());
        let hg = Sha512::digest(self.g.to_bytes_be());
        let mut hn_xor_hg = [0u8; 64];
        for (out, (x, y)) in hn_xor_hg.iter_mut().zip(hn.iter().zip(hg.iter())) {
            *out = x ^ y;
        }

        let mut hasher = Sha512::new();
        hasher.update(hn_xor_hg);
        hasher.update(Sha512::digest(username));
        hasher.update(salt);
        hasher.update(pad_bytes(a_pub));
        hasher.update(pad_bytes(b_pub));
        hasher.update(key);
        hasher.finalize().to_vec()
    }

    /// M2 = H(A, M1, K)
    fn compute_m2(a_pub: &[u8], m1: &[u8], key: &[u8]) -> Vec<u8> {
        let mut hasher = Sha512::new();
        hasher.update(pad_bytes(a_pub));
        hasher.update(m1);
        hasher.update(key);
        hasher.finalize().to_vec()
    }

    fn random_exponent(&self) -> BigUint {
        let mut rng = rand::thread_rng();
        let exp: BigUint = rng.sample(RandomBits::new(256));
        exp % &self.n
    }
}

fn pad(value: &BigUint) -> Vec<u8> {
    pad_bytes(&value.to_bytes_be())
}

/// Left-pad to the group size
fn pad_bytes(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() >= lengths::SRP_PUBLIC_KEY {
        return bytes.to_vec();
    }
    let mut padded = vec![0u8; lengths::SRP_PUBLIC_KEY];
    padded[lengths::SRP_PUBLIC_KEY - bytes.len()..].copy_from_slice(bytes);
    padded
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Accessory side of the SRP-6a exchange
pub struct SrpServer {
    group: SrpGroup,
    verifier: BigUint,
    b: BigUint,
    public_key: Vec<u8>,
}

impl SrpServer {
    /// Compute the password verifier `v = g^x % N`
    ///
    /// # Errors
    /// Returns `SrpError` if the group parameters fail to load.
    pub fn compute_verifier(
        username: &[u8],
        password: &[u8],
        salt: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let x = SrpGroup::compute_x(username, password, salt);
        Ok(group.g.modpow(&x, &group.n).to_bytes_be())
    }

    /// Start a server session for a stored verifier
    ///
    /// # Errors
    /// Returns `SrpError` if the group parameters fail to load.
    pub fn new(verifier: &[u8]) -> Result<Self, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let verifier = BigUint::from_bytes_be(verifier);
        let b = group.random_exponent();

        // B = (k * v + g^b) % N
        let b_pub = ((&group.k * &verifier) + group.g.modpow(&b, &group.n)) % &group.n;
        let public_key = pad(&b_pub);

        Ok(Self {
            group,
            verifier,
            b,
            public_key,
        })
    }

    /// Our public value `B`, padded to 384 bytes
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Check the controller's proof `M1`
    ///
    /// On success returns the shared session key `K` and the server proof `M2`.
    ///
    /// # Errors
    /// Returns `SrpError` if `A` is invalid or the proof does not match.
    pub fn verify_client(
        &self,
        username: &[u8],
        salt: &[u8],
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<(SessionKey, Vec<u8>), CryptoError> {
        let n = &self.group.n;
        let a_pub = BigUint::from_bytes_be(client_public);
        if (&a_pub % n).is_zero() {
            return Err(CryptoError::SrpError(
                "Invalid client public key".to_string(),
            ));
        }

        let u = SrpGroup::compute_u(client_public, &self.public_key);
        if u.is_zero() {
            return Err(CryptoError::SrpError("Invalid scrambling parameter".to_string()));
        }

        // S = (A * v^u) ^ b % N
        let base = (&a_pub * self.verifier.modpow(&u, n)) % n;
        let s_shared = base.modpow(&self.b, n);

        let mut key = Sha512::digest(s_shared.to_bytes_be()).to_vec();

        let expected_m1 =
            self.group
                .compute_m1(username, salt, client_public, &self.public_key, &key);
        if !constant_time_eq(&expected_m1, client_proof) {
            key.zeroize();
            return Err(CryptoError::SrpError(
                "Client proof verification failed".to_string(),
            ));
        }

        let m2 = SrpGroup::compute_m2(client_public, client_proof, &key);
        Ok((SessionKey { key }, m2))
    }
}

impl SrpServer {
    /// Overwrite the secret ephemeral `b`
    pub(crate) fn clear_ephemeral(&mut self) {
        self.b.set_zero();
    }

    #[cfg(test)]
    pub(crate) fn ephemeral_cleared(&self) -> bool {
        self.b.is_zero()
    }
}

impl Drop for SrpServer {
    fn drop(&mut self) {
        self.clear_ephemeral();
    }
}

/// Controller side of the SRP-6a exchange
pub struct SrpClient {
    group: SrpGroup,
    a: BigUint,
    public_key: Vec<u8>,
}

impl SrpClient {
    /// Start a client session with a fresh ephemeral `a`
    ///
    /// # Errors
    /// Returns `SrpError` if the group parameters fail to load.
    pub fn new() -> Result<Self, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let a = group.random_exponent();

        // A = g^a % n
        let public_key = pad(&group.g.modpow(&a, &group.n));

        Ok(Self {
            group,
            a,
            public_key,
        })
    }

    /// Our public value `A`, padded to 384 bytes
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compute the shared key and client proof for a server challenge
    ///
    /// # Errors
    /// Returns `SrpError` if the server public value is invalid.
    pub fn process_challenge(
        &self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        server_public: &[u8],
    ) -> Result<SrpVerifier, CryptoError> {
        let n = &self.group.n;
        let b_pub = BigUint::from_bytes_be(server_public);
        if (&b_pub % n).is_zero() {
            return Err(CryptoError::SrpError(
                "Invalid server public key".to_string(),
            ));
        }

        let u = SrpGroup::compute_u(&self.public_key, server_public);
        let x = SrpGroup::compute_x(username, password, salt);

        // S = (B - k * g^x) ^ (a + u * x) % n
        // BigUint can not go negative, so add n before subtracting.
        let k_g_x = (&self.group.k * self.group.g.modpow(&x, n)) % n;
        let base = ((&b_pub % n) + n - k_g_x) % n;
        let exp = &self.a + (&u * x);
        let s_shared = base.modpow(&exp, n);

        let key = Sha512::digest(s_shared.to_bytes_be()).to_vec();
        let m1 = self
            .group
            .compute_m1(username, salt, &self.public_key, server_public, &key);

        Ok(SrpVerifier {
            a_pub: self.public_key.clone(),
            m1,
            key,
        })
    }
}

impl SrpClient {
    /// Overwrite the secret ephemeral `a`
    pub(crate) fn clear_ephemeral(&mut self) {
        self.a.set_zero();
    }

    #[cfg(test)]
    pub(crate) fn ephemeral_cleared(&self) -> bool {
        self.a.is_zero()
    }
}

impl Drop for SrpClient {
    fn drop(&mut self) {
        self.clear_ephemeral();
    }
}

/// Client state between sending `M1` and receiving `M2`
pub struct SrpVerifier {
    a_pub: Vec<u8>,
    m1: Vec<u8>,
    key: Vec<u8>,
}

impl SrpVerifier {
    /// Client proof `M1`
    pub fn client_proof(&self) -> &[u8] {
        &self.m1
    }

    /// Check the server proof `M2` and release the session key
    ///
    /// # Errors
    /// Returns `SrpError` if the proof does not match.
    pub fn verify_server(&self, server_proof: &[u8]) -> Result<SessionKey, CryptoError> {
        let expected_m2 = SrpGroup::compute_m2(&self.a_pub, &self.m1, &self.key);

        if !constant_time_eq(&expected_m2, server_proof) {
            return Err(CryptoError::SrpError(
                "Server proof verification failed".to_string(),
            ));
        }

        Ok(SessionKey {
            key: self.key.clone(),
        })
    }
}

impl Drop for SrpVerifier {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Shared SRP session key `K`
pub struct SessionKey {
    key: Vec<u8>,
}

impl SessionKey {
    /// Key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
