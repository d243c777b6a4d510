// SPDX-License-Identifier: Apache-2.0

//! Path encoding and response parsing shared by the Ethereum app commands

use crate::errors::{EthAppError, EthAppResult};
use crate::instructions::length;
use crate::types::BipPath;

/// `len || index_0 || ... || index_n`, indices big-endian
pub fn encode_bip32_path(path: &BipPath) -> Vec<u8> {
    std::iter::once(path.indices.len() as u8)
        .chain(path.indices.iter().flat_map(|index| index.to_be_bytes()))
        .collect()
}

/// Reject paths the Ethereum app refuses
pub fn validate_bip32_path<E: std::error::Error>(path: &BipPath) -> EthAppResult<(), E> {
    match path.indices.len() {
        0 => return Err(EthAppError::InvalidBip32Path("Empty path".to_string())),
        depth if depth > length::MAX_BIP32_PATH_DEPTH => {
            return Err(EthAppError::InvalidBip32Path(format!(
                "Path too deep: {} (max {})",
                depth,
                length::MAX_BIP32_PATH_DEPTH
            )))
        }
        _ => {}
    }

    // m/44'/60'/account'/... requires a hardened account level
    if let [0x8000002C, 0x8000003C, account, ..] = path.indices.as_slice() {
        if account & 0x8000_0000 == 0 {
            return Err(EthAppError::InvalidBip32Path(
                "Account index should be hardened for Ethereum".to_string(),
            ));
        }
    }

    Ok(())
}

/// Cursor over a device answer made of length-prefixed and fixed-size fields
#[derive(Debug)]
pub struct ResponseReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ResponseReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ResponseReader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// One length byte followed by that many bytes
    pub fn length_prefixed<E: std::error::Error>(
        &mut self,
        field: &str,
    ) -> EthAppResult<&'a [u8], E> {
        let len = *self.data.get(self.pos).ok_or_else(|| {
            EthAppError::InvalidResponseData(format!("Missing {} length", field))
        })? as usize;
        self.pos += 1;
        self.fixed(len, field)
    }

    pub fn fixed<E: std::error::Error>(
        &mut self,
        len: usize,
        field: &str,
    ) -> EthAppResult<&'a [u8], E> {
        if self.remaining() < len {
            return Err(EthAppError::InvalidResponseData(format!(
                "Insufficient data for {}: available {}, needed {}",
                field,
                self.remaining(),
                len
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Io = std::io::Error;

    #[test]
    fn test_encode_bip32_path() {
        let encoded = encode_bip32_path(&BipPath::default());

        assert_eq!(encoded.len(), 1 + 5 * 4);
        assert_eq!(encoded[0], 5);
        assert_eq!(&encoded[1..5], &0x8000002Cu32.to_be_bytes());
        assert_eq!(&encoded[5..9], &0x8000003Cu32.to_be_bytes());
        assert_eq!(&encoded[17..21], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_validate_bip32_path() {
        let soft_account = BipPath::new(vec![0x8000002C, 0x8000003C, 0, 0, 0]).unwrap();
        assert!(matches!(
            validate_bip32_path::<Io>(&soft_account),
            Err(EthAppError::InvalidBip32Path(_))
        ));

        let empty = BipPath::new(vec![]).unwrap();
        assert!(validate_bip32_path::<Io>(&empty).is_err());

        assert!(validate_bip32_path::<Io>(&BipPath::default()).is_ok());
    }

    #[test]
    fn test_response_reader() {
        let data = [2, 0xaa, 0xbb, 1, 2, 3];
        let mut reader = ResponseReader::new(&data);

        assert_eq!(reader.length_prefixed::<Io>("key").unwrap(), &[0xaa, 0xbb]);
        assert_eq!(reader.fixed::<Io>(3, "code").unwrap(), &[1, 2, 3]);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.length_prefixed::<Io>("address").is_err());
    }

    #[test]
    fn test_response_reader_short_field() {
        let data = [4, 0xaa];
        let mut reader = ResponseReader::new(&data);

        let err = reader.length_prefixed::<Io>("public key").unwrap_err();
        assert_eq!(
            err.to_string(),
            EthAppError::<Io>::InvalidResponseData(
                "Insufficient data for public key: available 1, needed 4".to_string()
            )
            .to_string()
        );
    }
}
