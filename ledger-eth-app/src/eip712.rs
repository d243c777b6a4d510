// SPDX-License-Identifier: Apache-2.0

//! EIP-712 typed data hashing
//!
//! The Ethereum app accepts typed data in "hashed" mode, where the host sends the
//! domain separator and the `hashStruct` of the primary message. This module
//! computes both from the usual JSON representation:
//!
//! ```text
//! {
//!   "types": { "EIP712Domain": [...], "Mail": [...] },
//!   "primaryType": "Mail",
//!   "domain": { ... },
//!   "message": { ... }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Num, One, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use thiserror::Error;

const DOMAIN_TYPE: &str = "EIP712Domain";

/// Errors raised while hashing typed data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypedDataError {
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("missing value for field `{0}`")]
    MissingField(String),
    #[error("invalid value for `{field}` of type `{ty}`")]
    InvalidValue { field: String, ty: String },
    #[error("array `{0}` has the wrong length")]
    ArrayLength(String),
}

/// A field of a struct type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// A complete EIP-712 payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub types: BTreeMap<String, Vec<TypeField>>,
    pub primary_type: String,
    #[serde(default)]
    pub domain: Value,
    pub message: Value,
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

impl TypedData {
    /// Parse the JSON form used by `eth_signTypedData_v4`
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// `hashStruct(EIP712Domain, domain)`
    ///
    /// When `types` has no `EIP712Domain` entry the domain type is inferred from
    /// the fields present in `domain`, in canonical order.
    pub fn domain_separator(&self) -> Result<[u8; 32], TypedDataError> {
        if self.types.contains_key(DOMAIN_TYPE) {
            return self.hash_struct(DOMAIN_TYPE, &self.domain);
        }

        let inferred: Vec<TypeField> = [
            ("name", "string"),
            ("version", "string"),
            ("chainId", "uint256"),
            ("verifyingContract", "address"),
            ("salt", "bytes32"),
        ]
        .iter()
        .filter(|(name, _)| self.domain.get(*name).is_some())
        .map(|(name, ty)| TypeField {
            name: name.to_string(),
            ty: ty.to_string(),
        })
        .collect();

        let mut with_domain = self.types.clone();
        with_domain.insert(DOMAIN_TYPE.to_string(), inferred);
        let typed = TypedData {
            types: with_domain,
            primary_type: self.primary_type.clone(),
            domain: self.domain.clone(),
            message: Value::Null,
        };
        typed.hash_struct(DOMAIN_TYPE, &self.domain)
    }

    /// `hashStruct(primaryType, message)`
    pub fn message_hash(&self) -> Result<[u8; 32], TypedDataError> {
        self.hash_struct(&self.primary_type, &self.message)
    }

    /// `keccak256(0x19 0x01 || domainSeparator || hashStruct(message))`
    pub fn signing_hash(&self) -> Result<[u8; 32], TypedDataError> {
        let mut data = Vec::with_capacity(66);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(&self.domain_separator()?);
        data.extend_from_slice(&self.message_hash()?);
        Ok(keccak256(&data))
    }

    /// `encodeType`: the primary struct followed by its dependencies sorted by name
    pub fn encode_type(&self, primary: &str) -> Result<String, TypedDataError> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(primary, &mut deps)?;
        deps.remove(primary);

        let mut encoded = self.encode_single(primary)?;
        for dep in &deps {
            encoded.push_str(&self.encode_single(dep)?);
        }
        Ok(encoded)
    }

    pub fn type_hash(&self, primary: &str) -> Result<[u8; 32], TypedDataError> {
        Ok(keccak256(self.encode_type(primary)?.as_bytes()))
    }

    pub fn hash_struct(&self, ty: &str, value: &Value) -> Result<[u8; 32], TypedDataError> {
        Ok(keccak256(&self.encode_data(ty, value)?))
    }

    fn fields(&self, ty: &str) -> Result<&Vec<TypeField>, TypedDataError> {
        self.types
            .get(ty)
            .ok_or_else(|| TypedDataError::UnknownType(ty.to_string()))
    }

    fn encode_single(&self, ty: &str) -> Result<String, TypedDataError> {
        let members: Vec<String> = self
            .fields(ty)?
            .iter()
            .map(|f| format!("{} {}", f.ty, f.name))
            .collect();
        Ok(format!("{}({})", ty, members.join(",")))
    }

    fn collect_dependencies(
        &self,
        ty: &str,
        found: &mut BTreeSet<String>,
    ) -> Result<(), TypedDataError> {
        if found.contains(ty) {
            return Ok(());
        }
        found.insert(ty.to_string());
        for field in self.fields(ty)? {
            let base = base_type(&field.ty);
            if self.types.contains_key(base) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    fn encode_data(&self, ty: &str, value: &Value) -> Result<Vec<u8>, TypedDataError> {
        let fields = self.fields(ty)?;
        let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
        encoded.extend_from_slice(&self.type_hash(ty)?);

        for field in fields {
            let member = value
                .get(&field.name)
                .ok_or_else(|| TypedDataError::MissingField(field.name.clone()))?;
            encoded.extend_from_slice(&self.encode_value(&field.name, &field.ty, member)?);
        }
        Ok(encoded)
    }

    fn encode_value(
        &self,
        field: &str,
        ty: &str,
        value: &Value,
    ) -> Result<[u8; 32], TypedDataError> {
        let invalid = || TypedDataError::InvalidValue {
            field: field.to_string(),
            ty: ty.to_string(),
        };

        if let Some((inner, len)) = split_array(ty) {
            let items = value.as_array().ok_or_else(invalid)?;
            if let Some(len) = len {
                if items.len() != len {
                    return Err(TypedDataError::ArrayLength(field.to_string()));
                }
            }
            let mut concatenated = Vec::with_capacity(items.len() * 32);
            for item in items {
                concatenated.extend_from_slice(&self.encode_value(field, inner, item)?);
            }
            return Ok(keccak256(&concatenated));
        }

        if self.types.contains_key(ty) {
            return self.hash_struct(ty, value);
        }

        let mut word = [0u8; 32];
        match ty {
            "string" => Ok(keccak256(value.as_str().ok_or_else(invalid)?.as_bytes())),
            "bytes" => Ok(keccak256(&decode_hex(value).ok_or_else(invalid)?)),
            "bool" => {
                let flag = match value {
                    Value::Bool(b) => *b,
                    Value::String(s) if s == "true" || s == "false" => s == "true",
                    _ => return Err(invalid()),
                };
                word[31] = flag as u8;
                Ok(word)
            }
            "address" => {
                let bytes = decode_hex(value).ok_or_else(invalid)?;
                if bytes.len() != 20 {
                    return Err(invalid());
                }
                word[12..].copy_from_slice(&bytes);
                Ok(word)
            }
            _ if ty.starts_with("bytes") => {
                let size: usize = ty[5..].parse().map_err(|_| invalid())?;
                let bytes = decode_hex(value).ok_or_else(invalid)?;
                if size == 0 || size > 32 || bytes.len() > size {
                    return Err(invalid());
                }
                word[..bytes.len()].copy_from_slice(&bytes);
                Ok(word)
            }
            _ if ty.starts_with("uint") || ty.starts_with("int") => {
                let number = parse_integer(value).ok_or_else(invalid)?;
                if ty.starts_with("uint") && number.sign() == Sign::Minus {
                    return Err(invalid());
                }
                encode_int(&number).ok_or_else(invalid)
            }
            _ => Err(TypedDataError::UnknownType(ty.to_string())),
        }
    }
}

/// Strip every array suffix: `Person[][2]` -> `Person`
fn base_type(ty: &str) -> &str {
    ty.find('[').map_or(ty, |idx| &ty[..idx])
}

/// Split off the outermost array dimension: `uint8[][3]` -> (`uint8[]`, Some(3))
fn split_array(ty: &str) -> Option<(&str, Option<usize>)> {
    let stripped = ty.strip_suffix(']')?;
    let open = stripped.rfind('[')?;
    let len = &stripped[open + 1..];
    let len = if len.is_empty() {
        None
    } else {
        Some(len.parse().ok()?)
    };
    Some((&ty[..open], len))
}

fn decode_hex(value: &Value) -> Option<Vec<u8>> {
    let s = value.as_str()?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok()
}

fn parse_integer(value: &Value) -> Option<BigInt> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(BigInt::from)
            .or_else(|| n.as_u64().map(BigInt::from)),
        Value::String(s) => {
            let (negative, digits) = match s.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, s.as_str()),
            };
            let magnitude = match digits
                .strip_prefix("0x")
                .or_else(|| digits.strip_prefix("0X"))
            {
                Some(hex) => BigUint::from_str_radix(hex, 16).ok()?,
                None => BigUint::from_str_radix(digits, 10).ok()?,
            };
            let sign = if negative { Sign::Minus } else { Sign::Plus };
            Some(BigInt::from_biguint(sign, magnitude))
        }
        _ => None,
    }
}

/// 256-bit two's complement, big-endian
fn encode_int(number: &BigInt) -> Option<[u8; 32]> {
    let modulus = BigUint::one() << 256;
    let unsigned = match number.to_biguint() {
        Some(positive) => positive,
        None => {
            let magnitude = number.magnitude();
            if magnitude.is_zero() || magnitude > &(BigUint::one() << 255) {
                return None;
            }
            &modulus - magnitude
        }
    };
    if unsigned >= modulus {
        return None;
    }

    let bytes = unsigned.to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Some(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mail() -> TypedData {
        serde_json::from_value(json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                "Person": [
                    { "name": "name", "type": "string" },
                    { "name": "wallet", "type": "address" }
                ],
                "Mail": [
                    { "name": "from", "type": "Person" },
                    { "name": "to", "type": "Person" },
                    { "name": "contents", "type": "string" }
                ]
            },
            "primaryType": "Mail",
            "domain": {
                "name": "Ether Mail",
                "version": "1",
                "chainId": 1,
                "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
            },
            "message": {
                "from": { "name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826" },
                "to": { "name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB" },
                "contents": "Hello, Bob!"
            }
        }))
        .unwrap()
    }

    #[test]
    fn encodes_type_with_sorted_dependencies() {
        assert_eq!(
            mail().encode_type("Mail").unwrap(),
            "Mail(Person from,Person to,string contents)Person(string name,address wallet)"
        );
    }

    #[test]
    fn mail_example_hashes() {
        let data = mail();
        assert_eq!(
            hex::encode(data.domain_separator().unwrap()),
            "f2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
        );
        assert_eq!(
            hex::encode(data.message_hash().unwrap()),
            "c52c0ee5d84264471806290a3f2c4cecfc5490626bf912d01f240d7a274b371e"
        );
        assert_eq!(
            hex::encode(data.signing_hash().unwrap()),
            "be609aee343fb3c4b28e1df9e632fca64fcfaede20f02e86244efddf30957bd2"
        );
    }

    #[test]
    fn domain_type_is_inferred_when_missing() {
        let mut data = mail();
        let explicit = data.domain_separator().unwrap();
        data.types.remove(DOMAIN_TYPE);
        assert_eq!(data.domain_separator().unwrap(), explicit);
    }

    #[test]
    fn missing_field_is_reported() {
        let mut data = mail();
        data.message = json!({ "contents": "hi" });
        assert_eq!(
            data.message_hash().unwrap_err(),
            TypedDataError::MissingField("from".to_string())
        );
    }

    #[test]
    fn splits_array_types() {
        assert_eq!(split_array("uint8[]"), Some(("uint8", None)));
        assert_eq!(split_array("Person[][3]"), Some(("Person[]", Some(3))));
        assert_eq!(split_array("address"), None);
        assert_eq!(base_type("Person[][3]"), "Person");
    }

    #[test]
    fn negative_integers_use_twos_complement() {
        let word = encode_int(&BigInt::from(-1)).unwrap();
        assert!(word.iter().all(|&b| b == 0xff));

        let word = encode_int(&BigInt::from(258)).unwrap();
        assert_eq!(&word[30..], &[0x01, 0x02]);

        assert!(encode_int(&(BigInt::one() << 256)).is_none());
    }

    #[test]
    fn parses_hex_and_decimal_strings() {
        assert_eq!(parse_integer(&json!("0x10")), Some(BigInt::from(16)));
        assert_eq!(parse_integer(&json!("-42")), Some(BigInt::from(-42)));
        assert_eq!(parse_integer(&json!(7)), Some(BigInt::from(7)));
        assert_eq!(parse_integer(&json!("seven")), None);
    }
}
