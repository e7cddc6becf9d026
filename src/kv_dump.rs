use std::collections::BTreeMap;
use std::fmt;
use log::{info, warn};
use redis::Commands;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvDumpError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// A value read back from the store, shaped by its type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KvValue {
    Text(String),
    List(Vec<String>),
    Set(Vec<String>),
    Hash(BTreeMap<String, String>),
    SortedSet(Vec<(String, f64)>),
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: String,
    pub kind: String,
    pub value: KvValue,
}

impl fmt::Display for KvEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.value {
            KvValue::Unsupported(kind) => format!("Unsupported type: {}", kind),
            other => serde_json::to_string(other).map_err(|_| fmt::Error)?,
        };
        write!(f, "Key: {}, Type: {}, Value: {}", self.key, self.kind, value)
    }
}

/// The handful of read commands a dump needs.
pub trait KeyValueSource {
    fn keys(&mut self, pattern: &str) -> Result<Vec<String>, KvDumpError>;
    fn key_type(&mut self, key: &str) -> Result<String, KvDumpError>;
    fn text(&mut self, key: &str) -> Result<String, KvDumpError>;
    fn list(&mut self, key: &str) -> Result<Vec<String>, KvDumpError>;
    fn set_members(&mut self, key: &str) -> Result<Vec<String>, KvDumpError>;
    fn hash(&mut self, key: &str) -> Result<BTreeMap<String, String>, KvDumpError>;
    fn sorted_set(&mut self, key: &str) -> Result<Vec<(String, f64)>, KvDumpError>;
}

pub fn read_entry<S: KeyValueSource + ?Sized>(source: &mut S, key: &str) -> Result<KvEntry, KvDumpError> {
    let kind = source.key_type(key)?;
    let value = match kind.as_str() {
        "string" => KvValue::Text(source.text(key)?),
        "list" => KvValue::List(source.list(key)?),
        "set" => {
            let mut members = source.set_members(key)?;
            members.sort();
            KvValue::Set(members)
        }
        "hash" => KvValue::Hash(source.hash(key)?),
        "zset" => KvValue::SortedSet(source.sorted_set(key)?),
        other => KvValue::Unsupported(other.to_string()),
    };
    Ok(KvEntry { key: key.to_string(), kind, value })
}

/// Every key matching `pattern` with its value, in key order.
pub fn dump<S: KeyValueSource + ?Sized>(source: &mut S, pattern: &str) -> Result<Vec<KvEntry>, KvDumpError> {
    let mut keys = source.keys(pattern)?;
    keys.sort();
    info!("Found {} keys matching '{}'.", keys.len(), pattern);

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        match read_entry(source, &key) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Failed to read key '{}': {}", key, e),
        }
    }
    Ok(entries)
}

pub struct RedisSource {
    connection: redis::Connection,
}

impl RedisSource {
    pub fn connect(url: &str) -> Result<Self, KvDumpError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection()?;
        info!("Connected to {}", url);
        Ok(RedisSource { connection })
    }
}

impl KeyValueSource for RedisSource {
    fn keys(&mut self, pattern: &str) -> Result<Vec<String>, KvDumpError> {
        Ok(self.connection.keys(pattern)?)
    }

    fn key_type(&mut self, key: &str) -> Result<String, KvDumpError> {
        Ok(redis::cmd("TYPE").arg(key).query(&mut self.connection)?)
    }

    fn text(&mut self, key: &str) -> Result<String, KvDumpError> {
        Ok(self.connection.get(key)?)
    }

    fn list(&mut self, key: &str) -> Result<Vec<String>, KvDumpError> {
        Ok(self.connection.lrange(key, 0, -1)?)
    }

    fn set_members(&mut self, key: &str) -> Result<Vec<String>, KvDumpError> {
        Ok(self.connection.smembers(key)?)
    }

    fn hash(&mut self, key: &str) -> Result<BTreeMap<String, String>, KvDumpError> {
        Ok(self.connection.hgetall(key)?)
    }

    fn sorted_set(&mut self, key: &str) -> Result<Vec<(String, f64)>, KvDumpError> {
        Ok(self.connection.zrange_withscores(key, 0, -1)?)
    }
}
