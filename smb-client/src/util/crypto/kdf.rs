use digest::Mac;

/// NIST SP 800-108 KDF in counter mode, as used for SMB3 key derivation
/// ([MS-SMB2] 3.1.4.2): each block MACs `i || label || 0x00 || context || L`
/// with a 32-bit big-endian counter starting at 1.
pub fn derive_key<M: Mac + Clone>(mac: M, label: &[u8], context: &[u8], key_len_bits: u32) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + label.len() + 1 + context.len() + 4);
    message.extend_from_slice(&[0; 4]);
    message.extend_from_slice(label);
    message.push(0);
    message.extend_from_slice(context);
    message.extend_from_slice(&key_len_bits.to_be_bytes());

    let key_len = (key_len_bits / 8) as usize;
    let mut output = Vec::with_capacity(key_len);
    let mut counter: u32 = 1;
    while output.len() < key_len {
        message[..4].copy_from_slice(&counter.to_be_bytes());
        let block = mac.clone().chain_update(&message).finalize().into_bytes();
        let needed = key_len - output.len();
        output.extend_from_slice(&block[..needed.min(block.len())]);
        counter += 1;
    }
    output
}
