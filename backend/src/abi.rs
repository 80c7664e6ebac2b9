//! Contract codec for the quadratic-voting governance contract.
//!
//! The declared ABI covers the view functions the backend reads and the
//! `ProposalExecuted` event the bridge projects. Topic 0 of every event is
//! the keccak-256 of its canonical signature; indexed parameters occupy
//! topics 1 and up.

use ethers::abi::{Abi, AbiParser, ParamType, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};
use lazy_static::lazy_static;
use thiserror::Error;

lazy_static! {
    static ref GOVERNANCE_ABI: Abi = AbiParser::default()
        .parse(&[
            "function getProposal(uint256 proposalId) view returns (address suspiciousAddress, address creator, string description, uint256 votesFor, uint256 votesAgainst, uint256 endTime, bool executed, bool passed)",
            "function getProposalVoterCount(uint256 proposalId) view returns (uint256)",
            "function scamScore(address target) view returns (uint256)",
            "function isConfirmedScam(address target) view returns (bool)",
            "function getThreatScore(address target) view returns (uint256)",
            "function getDAOConfidence(address target) view returns (uint256 votesFor, uint256 votesAgainst, uint256 totalVoters)",
            "event ProposalExecuted(uint256 indexed proposalId, bool passed)",
        ])
        .expect("static governance ABI parses");
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown method {0}")]
    UnknownMethod(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("malformed log: {0}")]
    MalformedLog(String),
}

/// Parse a 20-byte hex address, with or without the `0x` prefix.
pub fn parse_address(s: &str) -> Result<Address, CodecError> {
    s.trim()
        .parse::<Address>()
        .map_err(|_| CodecError::InvalidAddress(s.to_string()))
}

/// ABI-encode a method call against the governance contract.
pub fn encode_call(method: &str, args: &[Token]) -> Result<Bytes, CodecError> {
    let function = GOVERNANCE_ABI
        .function(method)
        .map_err(|_| CodecError::UnknownMethod(method.to_string()))?;
    function
        .encode_input(args)
        .map(Bytes::from)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode the raw return data of a method call.
pub fn decode_output(method: &str, data: &[u8]) -> Result<Vec<Token>, CodecError> {
    let function = GOVERNANCE_ABI
        .function(method)
        .map_err(|_| CodecError::UnknownMethod(method.to_string()))?;
    function
        .decode_output(data)
        .map_err(|e| CodecError::Decode(e.to_string()))
}

/// Decode a single-uint return value.
pub fn decode_uint(method: &str, data: &[u8]) -> Result<U256, CodecError> {
    match decode_output(method, data)?.first() {
        Some(Token::Uint(value)) => Ok(*value),
        other => Err(CodecError::Decode(format!(
            "{method}: expected uint, got {other:?}"
        ))),
    }
}

/// Decode a single-bool return value.
pub fn decode_bool(method: &str, data: &[u8]) -> Result<bool, CodecError> {
    match decode_output(method, data)?.first() {
        Some(Token::Bool(value)) => Ok(*value),
        other => Err(CodecError::Decode(format!(
            "{method}: expected bool, got {other:?}"
        ))),
    }
}

// ── getProposal ─────────────────────────────────────────────────

/// On-chain proposal record, as returned by `getProposal(uint256)`.
#[derive(Debug, Clone)]
pub struct OnchainProposal {
    pub suspicious_address: Address,
    pub creator: Address,
    pub description: String,
    pub votes_for: U256,
    pub votes_against: U256,
    pub end_time: U256,
    pub executed: bool,
    pub passed: bool,
}

pub fn decode_get_proposal(data: &[u8]) -> Result<OnchainProposal, CodecError> {
    let tokens = decode_output("getProposal", data)?;
    let mut iter = tokens.into_iter();

    let mut next = |what: &str| {
        iter.next()
            .ok_or_else(|| CodecError::Decode(format!("getProposal: missing {what}")))
    };

    let suspicious_address = as_address(next("suspiciousAddress")?)?;
    let creator = as_address(next("creator")?)?;
    let description = as_string(next("description")?)?;
    let votes_for = as_uint(next("votesFor")?)?;
    let votes_against = as_uint(next("votesAgainst")?)?;
    let end_time = as_uint(next("endTime")?)?;
    let executed = as_bool(next("executed")?)?;
    let passed = as_bool(next("passed")?)?;

    Ok(OnchainProposal {
        suspicious_address,
        creator,
        description,
        votes_for,
        votes_against,
        end_time,
        executed,
        passed,
    })
}

// ── DAO confidence ──────────────────────────────────────────────

/// Tally triple returned by `getDAOConfidence(address)`.
#[derive(Debug, Clone, Copy)]
pub struct OnchainConfidence {
    pub votes_for: U256,
    pub votes_against: U256,
    pub total_voters: U256,
}

pub fn decode_dao_confidence(data: &[u8]) -> Result<OnchainConfidence, CodecError> {
    let tokens = decode_output("getDAOConfidence", data)?;
    match tokens.as_slice() {
        [Token::Uint(votes_for), Token::Uint(votes_against), Token::Uint(total_voters)] => {
            Ok(OnchainConfidence {
                votes_for: *votes_for,
                votes_against: *votes_against,
                total_voters: *total_voters,
            })
        }
        other => Err(CodecError::Decode(format!(
            "getDAOConfidence: unexpected shape {other:?}"
        ))),
    }
}

// ── ProposalExecuted event ──────────────────────────────────────

/// Decoded `ProposalExecuted(uint256 indexed proposalId, bool passed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalExecuted {
    pub proposal_id: U256,
    pub passed: bool,
}

/// Topic 0 for the `ProposalExecuted` event.
pub fn proposal_executed_topic() -> H256 {
    GOVERNANCE_ABI
        .event("ProposalExecuted")
        .expect("event declared in static ABI")
        .signature()
}

/// Decode a raw log into a [`ProposalExecuted`].
///
/// Requires at least two topics: the event signature and the indexed
/// proposal id. `passed` is the single non-indexed parameter in the data.
pub fn decode_proposal_executed(log: &Log) -> Result<ProposalExecuted, CodecError> {
    if log.topics.len() < 2 {
        return Err(CodecError::MalformedLog(format!(
            "expected >= 2 topics, got {}",
            log.topics.len()
        )));
    }

    let proposal_id = U256::from_big_endian(log.topics[1].as_bytes());

    let decoded = ethers::abi::decode(&[ParamType::Bool], &log.data)
        .map_err(|e| CodecError::MalformedLog(format!("bad event data: {e}")))?;
    let passed = match decoded.first() {
        Some(Token::Bool(passed)) => *passed,
        other => {
            return Err(CodecError::MalformedLog(format!(
                "expected bool data, got {other:?}"
            )))
        }
    };

    Ok(ProposalExecuted {
        proposal_id,
        passed,
    })
}

// ── Token helpers ───────────────────────────────────────────────

fn as_address(token: Token) -> Result<Address, CodecError> {
    match token {
        Token::Address(addr) => Ok(addr),
        other => Err(CodecError::Decode(format!("expected address, got {other:?}"))),
    }
}

fn as_string(token: Token) -> Result<String, CodecError> {
    match token {
        Token::String(s) => Ok(s),
        other => Err(CodecError::Decode(format!("expected string, got {other:?}"))),
    }
}

fn as_uint(token: Token) -> Result<U256, CodecError> {
    match token {
        Token::Uint(u) => Ok(u),
        other => Err(CodecError::Decode(format!("expected uint, got {other:?}"))),
    }
}

fn as_bool(token: Token) -> Result<bool, CodecError> {
    match token {
        Token::Bool(b) => Ok(b),
        other => Err(CodecError::Decode(format!("expected bool, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;
    use ethers::utils::keccak256;

    #[test]
    fn test_event_topic_is_keccak_of_signature() {
        let expected = H256::from(keccak256("ProposalExecuted(uint256,bool)"));
        assert_eq!(proposal_executed_topic(), expected);
    }

    #[test]
    fn test_encode_scam_score_selector() {
        let target: Address = "0x00000000000000000000000000000000000000aa"
            .parse()
            .unwrap();
        let data = encode_call("scamScore", &[Token::Address(target)]).unwrap();
        let selector = &keccak256("scamScore(address)")[..4];
        assert_eq!(&data[..4], selector);
        assert_eq!(data.len(), 4 + 32);
    }

    #[test]
    fn test_decode_proposal_executed_passed() {
        let mut id_topic = [0u8; 32];
        id_topic[31] = 7;
        let log = Log {
            topics: vec![proposal_executed_topic(), H256::from(id_topic)],
            data: encode(&[Token::Bool(true)]).into(),
            ..Default::default()
        };
        let event = decode_proposal_executed(&log).unwrap();
        assert_eq!(event.proposal_id, U256::from(7u64));
        assert!(event.passed);
    }

    #[test]
    fn test_decode_proposal_executed_not_passed() {
        let log = Log {
            topics: vec![proposal_executed_topic(), H256::zero()],
            data: encode(&[Token::Bool(false)]).into(),
            ..Default::default()
        };
        let event = decode_proposal_executed(&log).unwrap();
        assert!(!event.passed);
    }

    #[test]
    fn test_decode_rejects_missing_topics() {
        let log = Log {
            topics: vec![proposal_executed_topic()],
            data: encode(&[Token::Bool(true)]).into(),
            ..Default::default()
        };
        assert!(matches!(
            decode_proposal_executed(&log),
            Err(CodecError::MalformedLog(_))
        ));
    }

    #[test]
    fn test_get_proposal_round_trip() {
        let suspicious: Address = "0x00000000000000000000000000000000000000bb"
            .parse()
            .unwrap();
        let creator: Address = "0x00000000000000000000000000000000000000cc"
            .parse()
            .unwrap();
        let encoded = encode(&[
            Token::Address(suspicious),
            Token::Address(creator),
            Token::String("drainer contract".into()),
            Token::Uint(U256::from(5u64)),
            Token::Uint(U256::from(1u64)),
            Token::Uint(U256::from(1_700_000_000u64)),
            Token::Bool(true),
            Token::Bool(true),
        ]);

        let proposal = decode_get_proposal(&encoded).unwrap();
        assert_eq!(proposal.suspicious_address, suspicious);
        assert_eq!(proposal.description, "drainer contract");
        assert_eq!(proposal.votes_for, U256::from(5u64));
        assert!(proposal.passed);
    }

    #[test]
    fn test_decode_uint_and_bool() {
        let encoded = encode(&[Token::Uint(U256::from(83u64))]);
        assert_eq!(
            decode_uint("getThreatScore", &encoded).unwrap(),
            U256::from(83u64)
        );

        let encoded = encode(&[Token::Bool(true)]);
        assert!(decode_bool("isConfirmedScam", &encoded).unwrap());
    }

    #[test]
    fn test_parse_address_accepts_mixed_case() {
        assert!(parse_address("0x00000000000000000000000000000000000000AA").is_ok());
        assert!(parse_address("not-an-address").is_err());
        assert!(parse_address("0x1234").is_err());
    }
}
