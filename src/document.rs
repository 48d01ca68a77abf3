use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

pub type UserKey = String;
pub type TransactionId = String;

/// Every document kind that lives in the shared keyspace.
///
/// The store itself is schemaless, `Doctype` is the only thing telling
/// a user apart from a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Doctype")]
pub enum Document {
    #[serde(rename = "user")]
    User(User),
    #[serde(rename = "transaction")]
    Transaction(Transaction),
    #[serde(rename = "Area", alias = "area")]
    Area(Area),
    #[serde(rename = "candidate")]
    Candidate(Candidate),
    #[serde(rename = "election")]
    Election(Election),
}

impl Document {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A document kind with a fixed `Doctype` value.
pub trait DocumentKind: Sized + Serialize + DeserializeOwned {
    const DOCTYPE: &'static str;

    fn into_document(self) -> Document;

    fn from_document(document: Document) -> Option<Self>;

    /// Decodes bytes and checks that the discriminant matches this kind.
    fn decode(bytes: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        Document::from_bytes(bytes).map(Self::from_document)
    }

    fn encode(self) -> Result<Vec<u8>, serde_json::Error> {
        self.into_document().to_bytes()
    }
}

macro_rules! document_kind {
    ($ty:ident, $doctype:literal) => {
        impl DocumentKind for $ty {
            const DOCTYPE: &'static str = $doctype;

            fn into_document(self) -> Document {
                Document::$ty(self)
            }

            fn from_document(document: Document) -> Option<Self> {
                match document {
                    Document::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

document_kind!(User, "user");
document_kind!(Transaction, "transaction");
document_kind!(Area, "Area");
document_kind!(Candidate, "candidate");
document_kind!(Election, "election");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    /// Decimal string, e.g. `"99.5"`.
    pub balance: Decimal,
    /// Same value as the store key the document lives under.
    pub key: UserKey,
}

/// Append-only ledger entry, written once per transfer and never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    pub sender_email: String,
    pub receiver_email: String,
    pub amount: Decimal,
    pub transaction_id: TransactionId,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Area {
    pub name: String,
    pub division: String,
    pub district: String,
    pub thana: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Candidate {
    pub name: String,
    pub area_name: String,
    pub total_vote: u64,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Election {
    pub name: String,
    pub key: String,
}
