use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryMessage {
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: [u8; 2],

    /// Id of the sender.
    #[serde(rename = "id", with = "serde_bytes")]
    pub source_id: [u8; 8],

    /// Compact Ipv4 address of the sender.
    #[serde(rename = "addr", with = "serde_bytes")]
    pub source_address: [u8; 6],

    #[serde(flatten)]
    pub variant: PastryMessageVariant,
}

impl PastryMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<PastryMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "y")]
pub enum PastryMessageVariant {
    #[serde(rename = "q")]
    Request(PastryRequestSpecific),

    #[serde(rename = "r")]
    Response(PastryResponseSpecific),

    #[serde(rename = "e")]
    Error(PastryErrorSpecific),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum PastryRequestSpecific {
    #[serde(rename = "JOIN")]
    Join {
        #[serde(rename = "a")]
        arguments: PastryTargetArguments,
    },

    #[serde(rename = "PUT")]
    Put {
        #[serde(rename = "a")]
        arguments: PastryPutRequestArguments,
    },

    #[serde(rename = "GET")]
    Get {
        #[serde(rename = "a")]
        arguments: PastryTargetArguments,
    },

    #[serde(rename = "ROUTE_UPDATE")]
    RouteUpdate {
        #[serde(rename = "a")]
        arguments: PastryTargetArguments,
    },
}

/// Responses echo the type of the request they answer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "q")]
pub enum PastryResponseSpecific {
    #[serde(rename = "JOIN")]
    Join {
        #[serde(rename = "r")]
        arguments: PastryJoinResponseArguments,
    },

    #[serde(rename = "PUT")]
    Put {
        #[serde(rename = "r")]
        arguments: PastryPutResponseArguments,
    },

    #[serde(rename = "GET")]
    Get {
        #[serde(rename = "r")]
        arguments: PastryGetResponseArguments,
    },

    #[serde(rename = "ROUTE_UPDATE")]
    RouteUpdate {
        #[serde(rename = "r")]
        arguments: PastryRouteUpdateResponseArguments,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryErrorSpecific {
    #[serde(rename = "e")]
    pub error_info: (i32, String),
}

// === Requests ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryTargetArguments {
    #[serde(with = "serde_bytes")]
    pub target: [u8; 8],

    /// Milliseconds the sender waits for the response.
    #[serde(default)]
    #[serde(rename = "tm")]
    pub timeout: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryPutRequestArguments {
    #[serde(with = "serde_bytes")]
    pub target: [u8; 8],

    #[serde(with = "serde_bytes")]
    pub v: Box<[u8]>,

    #[serde(default)]
    #[serde(rename = "tm")]
    pub timeout: Option<u32>,
}

// === Responses ===

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryJoinResponseArguments {
    /// Compact peers of every hop on the route, in order.
    #[serde(with = "serde_bytes")]
    pub path: Box<[u8]>,

    /// Compact peers of each hop's routing table row, aligned with `path`.
    pub rows: Vec<ByteBuf>,

    /// Compact peers of the final hop's leaf set.
    #[serde(with = "serde_bytes")]
    pub leaf: Box<[u8]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryPutResponseArguments {
    #[serde(with = "serde_bytes")]
    pub owner: [u8; 14],
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryGetResponseArguments {
    #[serde(with = "serde_bytes")]
    pub owner: [u8; 14],

    #[serde(with = "serde_bytes")]
    #[serde(default)]
    pub v: Option<Box<[u8]>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PastryRouteUpdateResponseArguments {
    #[serde(with = "serde_bytes")]
    pub leaf: Box<[u8]>,
}
