mod hkdf;
