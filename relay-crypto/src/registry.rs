// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

/// A cipher's place in the stream layer: how its per-connection state is
/// advanced and whether it uses an IV at all.
///
/// `StreamPos` ciphers support random-access keystream generation and are
/// driven through a byte counter; `BlockMode` ciphers are CFB-style and
/// advance strictly sequentially via the underlying primitive's own
/// incremental state; `Table` has neither an IV nor any context at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CipherFamily {
    Table,
    BlockMode,
    StreamPos,
}

/// Static description of a supported cipher: name, key/IV sizes, family.
///
/// The whole table is `const` data with no runtime state; `CipherProfile`
/// (see `context.rs`) is the only thing that closes over a specific entry
/// plus the derived key.
#[derive(Copy, Clone, Debug)]
pub struct CipherDescriptor {
    pub name: &'static str,
    pub family: CipherFamily,
    pub key_len: usize,
    pub iv_len: usize,
}

/// The canonical set of supported cipher names.
pub const CIPHERS: &[CipherDescriptor] = &[
    CipherDescriptor { name: "table", family: CipherFamily::Table, key_len: 0, iv_len: 0 },
    CipherDescriptor { name: "rc4", family: CipherFamily::BlockMode, key_len: 16, iv_len: 0 },
    // RC4-MD5 advertises iv_len = 16 on the wire even though the RC4 primitive
    // itself is rekeyed per connection and consumes an empty IV. Preserved
    // verbatim for wire compatibility.
    CipherDescriptor { name: "rc4-md5", family: CipherFamily::BlockMode, key_len: 16, iv_len: 16 },
    CipherDescriptor { name: "aes-128-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 16 },
    CipherDescriptor { name: "aes-192-cfb", family: CipherFamily::BlockMode, key_len: 24, iv_len: 16 },
    CipherDescriptor { name: "aes-256-cfb", family: CipherFamily::BlockMode, key_len: 32, iv_len: 16 },
    CipherDescriptor { name: "bf-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 8 },
    CipherDescriptor { name: "camellia-128-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 16 },
    CipherDescriptor { name: "camellia-192-cfb", family: CipherFamily::BlockMode, key_len: 24, iv_len: 16 },
    CipherDescriptor { name: "camellia-256-cfb", family: CipherFamily::BlockMode, key_len: 32, iv_len: 16 },
    CipherDescriptor { name: "cast5-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 8 },
    CipherDescriptor { name: "des-cfb", family: CipherFamily::BlockMode, key_len: 8, iv_len: 8 },
    CipherDescriptor { name: "idea-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 8 },
    CipherDescriptor { name: "rc2-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 8 },
    CipherDescriptor { name: "seed-cfb", family: CipherFamily::BlockMode, key_len: 16, iv_len: 16 },
    CipherDescriptor { name: "salsa20", family: CipherFamily::StreamPos, key_len: 32, iv_len: 8 },
    CipherDescriptor { name: "chacha20", family: CipherFamily::StreamPos, key_len: 32, iv_len: 8 },
    CipherDescriptor { name: "chacha20-ietf", family: CipherFamily::StreamPos, key_len: 32, iv_len: 12 },
];

/// Look up a cipher by name. Returns `None` for anything not in `CIPHERS`;
/// callers building a `CipherProfile` from untrusted configuration should
/// fall back to `table` and log a warning rather than propagate this as a
/// hard error.
pub fn lookup(name: &str) -> Option<&'static CipherDescriptor> {
    CIPHERS.iter().find(|d| d.name == name)
}

pub fn table_descriptor() -> &'static CipherDescriptor {
    lookup("table").expect("table cipher is always registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_non_table_cipher_has_positive_sizes() {
        for d in CIPHERS {
            if d.family != CipherFamily::Table {
                assert!(d.key_len > 0, "{} must have a positive key length", d.name);
            }
        }
    }

    #[test]
    fn rc4_md5_reports_16_byte_iv() {
        let d = lookup("rc4-md5").unwrap();
        assert_eq!(d.iv_len, 16);
    }

    #[test]
    fn unknown_cipher_is_not_found() {
        assert!(lookup("not-a-real-cipher").is_none());
    }
}
