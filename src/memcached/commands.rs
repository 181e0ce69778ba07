// src/memcached/commands.rs

//! Parses and executes one [`MemcachedFrame`] against the KV facade,
//! producing the literal wire response bytes for each command.

use crate::kv::{CasOutcome, GetResult, KvFacade};
use crate::memcached::codec::MemcachedFrame;
use crate::memcached::stats::MemcachedStats;
use bytes::Bytes;

const MAX_KEY_LEN: usize = 250;

/// Outcome of executing a frame: the bytes to write back (empty when
/// `noreply` suppressed the response) and whether the connection should
/// close afterward.
pub struct Outcome {
    pub response: Bytes,
    pub should_close: bool,
}

fn reply(s: impl Into<String>) -> Outcome {
    Outcome {
        response: Bytes::from(s.into()),
        should_close: false,
    }
}

fn closing(s: impl Into<String>) -> Outcome {
    Outcome {
        response: Bytes::from(s.into()),
        should_close: true,
    }
}

fn token_str(tokens: &[Bytes], index: usize) -> Option<String> {
    tokens
        .get(index)
        .map(|t| String::from_utf8_lossy(t).to_string())
}

fn is_noreply(tokens: &[Bytes], expected_without_flag: usize) -> bool {
    tokens.len() > expected_without_flag
        && tokens[expected_without_flag].as_ref() == b"noreply"
}

fn validate_key(key: &str) -> Result<(), Outcome> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(reply("CLIENT_ERROR invalid key length\r\n"));
    }
    Ok(())
}

pub async fn execute(
    frame: MemcachedFrame,
    facade: &KvFacade,
    stats: &MemcachedStats,
    version: &str,
) -> Outcome {
    let Some(command) = token_str(&frame.tokens, 0).map(|s| s.to_ascii_lowercase()) else {
        return reply("ERROR\r\n");
    };

    match command.as_str() {
        "get" | "gets" => do_get(&frame, facade, stats, command == "gets").await,
        "set" | "add" | "replace" => do_store(&frame, facade, stats, &command).await,
        "append" | "prepend" => do_concat(&frame, facade, &command).await,
        "cas" => do_cas(&frame, facade).await,
        "delete" => do_delete(&frame, facade, stats).await,
        "incr" | "decr" => do_delta(&frame, facade, command == "incr").await,
        "touch" => do_touch(&frame, facade).await,
        "gat" => do_gat(&frame, facade, stats).await,
        "flush_all" => do_flush_all(&frame, facade).await,
        "stats" => do_stats(facade, stats).await,
        "version" => reply(format!("VERSION {version}\r\n")),
        "quit" => closing(""),
        _ => reply("ERROR\r\n"),
    }
}

async fn do_get(
    frame: &MemcachedFrame,
    facade: &KvFacade,
    stats: &MemcachedStats,
    with_cas: bool,
) -> Outcome {
    if frame.tokens.len() < 2 {
        return reply("ERROR\r\n");
    }
    let mut out = String::new();
    for key_bytes in &frame.tokens[1..] {
        let key = String::from_utf8_lossy(key_bytes).to_string();
        if validate_key(&key).is_err() {
            return reply("CLIENT_ERROR invalid key length\r\n");
        }
        match facade.get(&key).await {
            Ok(GetResult::Found(item)) => {
                stats.record_get(true);
                if with_cas {
                    out.push_str(&format!(
                        "VALUE {key} {} {} {}\r\n",
                        item.flags,
                        item.value.len(),
                        item.cas
                    ));
                } else {
                    out.push_str(&format!("VALUE {key} {} {}\r\n", item.flags, item.value.len()));
                }
                out.push_str(&String::from_utf8_lossy(&item.value));
                out.push_str("\r\n");
            }
            Ok(GetResult::NotFound) => stats.record_get(false),
            Err(_) => return reply("SERVER_ERROR backend failure\r\n"),
        }
    }
    out.push_str("END\r\n");
    reply(out)
}

async fn do_store(
    frame: &MemcachedFrame,
    facade: &KvFacade,
    stats: &MemcachedStats,
    command: &str,
) -> Outcome {
    if frame.tokens.len() < 5 {
        return reply("ERROR\r\n");
    }
    let key = token_str(&frame.tokens, 1).unwrap();
    if validate_key(&key).is_err() {
        return reply("CLIENT_ERROR invalid key length\r\n");
    }
    let (Some(flags), Some(exptime)) = (
        token_str(&frame.tokens, 2).and_then(|s| s.parse::<u32>().ok()),
        token_str(&frame.tokens, 3).and_then(|s| s.parse::<i64>().ok()),
    ) else {
        return reply("CLIENT_ERROR bad command line format\r\n");
    };
    let Some(payload) = frame.payload.clone() else {
        return reply("CLIENT_ERROR bad data chunk\r\n");
    };
    let noreply = is_noreply(&frame.tokens, 5);

    let result = match command {
        "set" => facade.set(&key, payload.to_vec(), flags, exptime).await,
        "add" => facade.add(&key, payload.to_vec(), flags, exptime).await,
        "replace" => facade.replace(&key, payload.to_vec(), flags, exptime).await,
        _ => unreachable!(),
    };

    let outcome = match result {
        Ok(()) => {
            stats.record_set(payload.len());
            reply("STORED\r\n")
        }
        Err(crate::core::PpdbError::Exists) => reply("NOT_STORED\r\n"),
        Err(crate::core::PpdbError::NotFound) => reply("NOT_STORED\r\n"),
        Err(crate::core::PpdbError::TooLarge) => reply("SERVER_ERROR object too large for cache\r\n"),
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

async fn do_concat(frame: &MemcachedFrame, facade: &KvFacade, command: &str) -> Outcome {
    if frame.tokens.len() < 5 {
        return reply("ERROR\r\n");
    }
    let key = token_str(&frame.tokens, 1).unwrap();
    if validate_key(&key).is_err() {
        return reply("CLIENT_ERROR invalid key length\r\n");
    }
    let Some(payload) = frame.payload.clone() else {
        return reply("CLIENT_ERROR bad data chunk\r\n");
    };
    let noreply = is_noreply(&frame.tokens, 5);

    let result = if command == "append" {
        facade.append(&key, &payload).await
    } else {
        facade.prepend(&key, &payload).await
    };

    let outcome = match result {
        Ok(()) => reply("STORED\r\n"),
        Err(crate::core::PpdbError::NotFound) => reply("NOT_STORED\r\n"),
        Err(crate::core::PpdbError::TooLarge) => reply("SERVER_ERROR object too large for cache\r\n"),
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

async fn do_cas(frame: &MemcachedFrame, facade: &KvFacade) -> Outcome {
    if frame.tokens.len() < 6 {
        return reply("ERROR\r\n");
    }
    let key = token_str(&frame.tokens, 1).unwrap();
    if validate_key(&key).is_err() {
        return reply("CLIENT_ERROR invalid key length\r\n");
    }
    let (Some(flags), Some(exptime), Some(expected_cas)) = (
        token_str(&frame.tokens, 2).and_then(|s| s.parse::<u32>().ok()),
        token_str(&frame.tokens, 3).and_then(|s| s.parse::<i64>().ok()),
        token_str(&frame.tokens, 5).and_then(|s| s.parse::<u64>().ok()),
    ) else {
        return reply("CLIENT_ERROR bad command line format\r\n");
    };
    let Some(payload) = frame.payload.clone() else {
        return reply("CLIENT_ERROR bad data chunk\r\n");
    };
    let noreply = is_noreply(&frame.tokens, 6);

    let outcome = match facade
        .cas(&key, payload.to_vec(), flags, exptime, expected_cas)
        .await
    {
        Ok(CasOutcome::Stored) => reply("STORED\r\n"),
        Ok(CasOutcome::NotFound) => reply("NOT_FOUND\r\n"),
        Ok(CasOutcome::Mismatch) => reply("EXISTS\r\n"),
        Err(crate::core::PpdbError::TooLarge) => reply("SERVER_ERROR object too large for cache\r\n"),
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

async fn do_delete(frame: &MemcachedFrame, facade: &KvFacade, stats: &MemcachedStats) -> Outcome {
    if frame.tokens.len() < 2 {
        return reply("ERROR\r\n");
    }
    let key = token_str(&frame.tokens, 1).unwrap();
    if validate_key(&key).is_err() {
        return reply("CLIENT_ERROR invalid key length\r\n");
    }
    let noreply = is_noreply(&frame.tokens, 2);
    let outcome = match facade.delete(&key).await {
        Ok(true) => {
            stats.record_delete();
            reply("DELETED\r\n")
        }
        Ok(false) => reply("NOT_FOUND\r\n"),
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

async fn do_delta(frame: &MemcachedFrame, facade: &KvFacade, increment: bool) -> Outcome {
    if frame.tokens.len() < 3 {
        return reply("ERROR\r\n");
    }
    let key = token_str(&frame.tokens, 1).unwrap();
    if validate_key(&key).is_err() {
        return reply("CLIENT_ERROR invalid key length\r\n");
    }
    let Some(delta) = token_str(&frame.tokens, 2).and_then(|s| s.parse::<u64>().ok()) else {
        return reply("CLIENT_ERROR invalid numeric delta argument\r\n");
    };
    let noreply = is_noreply(&frame.tokens, 3);

    let result = if increment {
        facade.incr(&key, delta).await
    } else {
        facade.decr(&key, delta).await
    };

    let outcome = match result {
        Ok(value) => reply(format!("{value}\r\n")),
        Err(crate::core::PpdbError::NotFound) => reply("NOT_FOUND\r\n"),
        Err(crate::core::PpdbError::InvalidData(_)) => {
            reply("CLIENT_ERROR cannot increment or decrement non-numeric value\r\n")
        }
        Err(crate::core::PpdbError::Overflow) => {
            reply("SERVER_ERROR value would overflow\r\n")
        }
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

async fn do_touch(frame: &MemcachedFrame, facade: &KvFacade) -> Outcome {
    if frame.tokens.len() < 3 {
        return reply("ERROR\r\n");
    }
    let key = token_str(&frame.tokens, 1).unwrap();
    if validate_key(&key).is_err() {
        return reply("CLIENT_ERROR invalid key length\r\n");
    }
    let Some(exptime) = token_str(&frame.tokens, 2).and_then(|s| s.parse::<i64>().ok()) else {
        return reply("CLIENT_ERROR invalid exptime argument\r\n");
    };
    let noreply = is_noreply(&frame.tokens, 3);
    let outcome = match facade.touch(&key, exptime).await {
        Ok(()) => reply("TOUCHED\r\n"),
        Err(crate::core::PpdbError::NotFound) => reply("NOT_FOUND\r\n"),
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

/// `gat <exptime> <key>*`: get-and-touch, one or more keys.
async fn do_gat(frame: &MemcachedFrame, facade: &KvFacade, stats: &MemcachedStats) -> Outcome {
    if frame.tokens.len() < 3 {
        return reply("ERROR\r\n");
    }
    let Some(exptime) = token_str(&frame.tokens, 1).and_then(|s| s.parse::<i64>().ok()) else {
        return reply("CLIENT_ERROR invalid exptime argument\r\n");
    };
    let mut out = String::new();
    for key_bytes in &frame.tokens[2..] {
        let key = String::from_utf8_lossy(key_bytes).to_string();
        if validate_key(&key).is_err() {
            return reply("CLIENT_ERROR invalid key length\r\n");
        }
        match facade.touch(&key, exptime).await {
            Ok(()) => {
                if let Ok(GetResult::Found(item)) = facade.get(&key).await {
                    stats.record_get(true);
                    out.push_str(&format!("VALUE {key} {} {}\r\n", item.flags, item.value.len()));
                    out.push_str(&String::from_utf8_lossy(&item.value));
                    out.push_str("\r\n");
                }
            }
            Err(crate::core::PpdbError::NotFound) => stats.record_get(false),
            Err(_) => return reply("SERVER_ERROR backend failure\r\n"),
        }
    }
    out.push_str("END\r\n");
    reply(out)
}

async fn do_flush_all(frame: &MemcachedFrame, facade: &KvFacade) -> Outcome {
    let noreply = is_noreply(&frame.tokens, 1)
        || (frame.tokens.len() > 2 && frame.tokens[2].as_ref() == b"noreply");
    let outcome = match facade.flush_all().await {
        Ok(()) => reply("OK\r\n"),
        Err(_) => reply("SERVER_ERROR backend failure\r\n"),
    };
    suppress_if_noreply(outcome, noreply)
}

async fn do_stats(facade: &KvFacade, stats: &MemcachedStats) -> Outcome {
    let curr_items = facade.item_count().await.unwrap_or(0);
    reply(stats.render(curr_items))
}

fn suppress_if_noreply(outcome: Outcome, noreply: bool) -> Outcome {
    if noreply {
        Outcome {
            response: Bytes::new(),
            should_close: outcome.should_close,
        }
    } else {
        outcome
    }
}
