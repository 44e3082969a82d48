pub mod kdf;
pub mod ntlm;
pub mod signing;
