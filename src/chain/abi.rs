//! ABI encoding for constructor and method arguments.
//!
//! Plan arguments are a small set of literal types. Each one is checked
//! against the declared parameter type (from the artifact ABI, or from an
//! explicit method signature) and encoded with alloy's dynamic ABI support.

use alloy::dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy::json_abi::{Function, JsonAbi, Param};
use alloy::primitives::{Address, U256};
use std::fmt;

use crate::errors::ChainError;

/// A single ABI-encodable argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    Bool(bool),
    String(String),
}

impl Token {
    /// Solidity type used when a method is given without a parameter list.
    pub fn type_name(&self) -> &'static str {
        match self {
            Token::Address(_) => "address",
            Token::Uint(_) => "uint256",
            Token::Bool(_) => "bool",
            Token::String(_) => "string",
        }
    }

    fn to_value(&self, ty: &DynSolType) -> Result<DynSolValue, ChainError> {
        match (self, ty) {
            (Token::Address(address), DynSolType::Address) => Ok(DynSolValue::Address(*address)),
            (Token::Uint(value), DynSolType::Uint(bits)) => {
                if value.bit_len() > *bits {
                    return Err(ChainError::Encoding(format!(
                        "{} does not fit in uint{}",
                        value, bits
                    )));
                }
                Ok(DynSolValue::Uint(*value, *bits))
            }
            (Token::Bool(flag), DynSolType::Bool) => Ok(DynSolValue::Bool(*flag)),
            (Token::String(text), DynSolType::String) => Ok(DynSolValue::String(text.clone())),
            (token, ty) => Err(ChainError::Encoding(format!(
                "cannot pass {} {} as {}",
                token.type_name(),
                token,
                ty.sol_type_name()
            ))),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Address(addr) => write!(f, "{}", addr),
            Token::Uint(value) => write!(f, "{}", value),
            Token::Bool(value) => write!(f, "{}", value),
            Token::String(value) => write!(f, "{:?}", value),
        }
    }
}

fn encoding_error(err: impl fmt::Display) -> ChainError {
    ChainError::Encoding(err.to_string())
}

fn values_for(params: &[Param], tokens: &[Token]) -> Result<Vec<DynSolValue>, ChainError> {
    if params.len() != tokens.len() {
        return Err(ChainError::Encoding(format!(
            "expected {} arguments, got {}",
            params.len(),
            tokens.len()
        )));
    }
    params
        .iter()
        .zip(tokens)
        .map(|(param, token)| {
            let ty: DynSolType = param.resolve().map_err(encoding_error)?;
            token.to_value(&ty)
        })
        .collect()
}

/// Constructor arguments, encoded for appending to the creation bytecode.
pub fn encode_constructor(abi: &JsonAbi, tokens: &[Token]) -> Result<Vec<u8>, ChainError> {
    match abi.constructor.as_ref() {
        Some(constructor) => {
            let values = values_for(&constructor.inputs, tokens)?;
            constructor.abi_encode_input(&values).map_err(encoding_error)
        }
        None if tokens.is_empty() => Ok(Vec::new()),
        None => Err(ChainError::Encoding(format!(
            "contract declares no constructor but {} arguments were given",
            tokens.len()
        ))),
    }
}

/// Resolve a method to its function definition.
///
/// A method given with an explicit parameter list, e.g. `grant(address,uint8)`,
/// is used verbatim. A bare name is typed from its arguments.
pub fn function_for(method: &str, tokens: &[Token]) -> Result<Function, ChainError> {
    let signature = if method.contains('(') {
        method.to_string()
    } else {
        let types: Vec<&str> = tokens.iter().map(Token::type_name).collect();
        format!("{}({})", method, types.join(","))
    };
    Function::parse(&signature).map_err(|e| {
        ChainError::Encoding(format!("invalid method signature '{}': {}", signature, e))
    })
}

/// Calldata (selector and arguments) for a state-changing method call.
pub fn encode_call(method: &str, tokens: &[Token]) -> Result<Vec<u8>, ChainError> {
    let function = function_for(method, tokens)?;
    let values = values_for(&function.inputs, tokens)?;
    function.abi_encode_input(&values).map_err(encoding_error)
}

/// Parse a uint literal in decimal or `0x` hex. Underscores are ignored.
pub fn parse_uint(text: &str) -> Result<U256, String> {
    let cleaned = text.trim().replace('_', "");
    cleaned
        .parse::<U256>()
        .map_err(|e| format!("invalid uint '{}': {}", text.trim(), e))
}
