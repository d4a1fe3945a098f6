//! Purpose: Lazy, forward-only traversal of paged list endpoints.
//! Exports: `Paginator`, `PageCursor`.
//! Role: Wraps repeated `Client::dispatch` calls and yields cache-backed proxies.
//! Invariants: The cursor only advances after a page was fetched and upserted.
//! Invariants: After the last page the iterator keeps returning `None`.
//! Invariants: A token is never sent twice; a token page without a new token is the last.
#![allow(clippy::result_large_err)]

use super::client::Client;
use super::entities::EntityProxy;
use super::transport::Call;
use crate::core::error::{Error, ErrorKind};
use crate::core::payload::RawPayload;
use serde_json::Value;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::marker::PhantomData;

type ApiResult<T> = Result<T, Error>;

/// Position of the next page: an offset, or an opaque token once the server sent one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageCursor {
    pub offset: usize,
    pub token: Option<String>,
    pub page_size: usize,
}

impl PageCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            offset: 0,
            token: None,
            page_size: page_size.max(1),
        }
    }

    fn apply(&self, call: Call) -> Call {
        let call = call.query("n", self.page_size);
        match &self.token {
            Some(token) => call.query("cursor", token),
            None => call.query("offset", self.offset),
        }
    }
}

pub struct Paginator<'c, P> {
    client: &'c mut Client,
    call: Call,
    cursor: PageCursor,
    buffer: VecDeque<P>,
    pages_fetched: usize,
    finished: bool,
    _proxy: PhantomData<fn() -> P>,
}

impl<'c, P: EntityProxy> Paginator<'c, P> {
    pub(crate) fn new(client: &'c mut Client, call: Call) -> Self {
        let page_size = client.config().page_size;
        Self {
            client,
            call,
            cursor: PageCursor::new(page_size),
            buffer: VecDeque::new(),
            pages_fetched: 0,
            finished: false,
            _proxy: PhantomData,
        }
    }

    /// Overrides the client's default page size; only meaningful before the first page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.cursor.page_size = page_size.max(1);
        self
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn is_finished(&self) -> bool {
        self.finished && self.buffer.is_empty()
    }

    /// Fetches the next whole page. `None` once the listing is exhausted; on error the
    /// cursor is left where it was so the same page is requested again.
    pub fn next_page(&mut self) -> Option<ApiResult<Vec<P>>> {
        if self.finished {
            return None;
        }
        let call = self.cursor.apply(self.call.clone());
        let page = match self.client.dispatch(&call).and_then(split_page) {
            Ok(page) => page,
            Err(err) => return Some(Err(err)),
        };
        let items = match page
            .items
            .into_iter()
            .map(|payload| self.client.adopt_payload::<P>(payload))
            .collect::<ApiResult<Vec<P>>>()
        {
            Ok(items) => items,
            Err(err) => return Some(Err(err)),
        };

        self.pages_fetched += 1;
        self.cursor.offset += items.len();
        // A token traversal ends when the server stops handing out fresh tokens.
        let token_exhausted = self.cursor.token.is_some()
            && (page.next_token.is_none() || page.next_token == self.cursor.token);
        if page.next_token.is_some() {
            self.cursor.token = page.next_token;
        }
        self.finished = items.is_empty()
            || items.len() < self.cursor.page_size
            || page.has_more == Some(false)
            || token_exhausted;
        tracing::debug!(
            path = %self.call.path(),
            items = items.len(),
            pages = self.pages_fetched,
            finished = self.finished,
            "page fetched"
        );
        Some(Ok(items))
    }
}

impl<P: EntityProxy> Iterator for Paginator<'_, P> {
    type Item = ApiResult<P>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            match self.next_page()? {
                Ok(items) => self.buffer.extend(items),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl<P: EntityProxy> FusedIterator for Paginator<'_, P> {}

struct Page {
    items: Vec<RawPayload>,
    has_more: Option<bool>,
    next_token: Option<String>,
}

/// Accepts a bare array or an object envelope carrying the items plus paging hints.
fn split_page(value: Value) -> ApiResult<Page> {
    match value {
        Value::Array(_) => Ok(Page {
            items: RawPayload::list(value)?,
            has_more: None,
            next_token: None,
        }),
        Value::Object(mut envelope) => {
            let items = ["data", "results", "items"]
                .iter()
                .find_map(|key| envelope.remove(*key))
                .ok_or_else(|| {
                    Error::new(ErrorKind::InvalidResponse)
                        .with_message("page envelope carries no item list")
                })?;
            let next_token = envelope
                .get("nextCursor")
                .or_else(|| envelope.get("cursor"))
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string);
            Ok(Page {
                items: RawPayload::list(items)?,
                has_more: envelope.get("hasMore").and_then(Value::as_bool),
                next_token,
            })
        }
        other => Err(Error::new(ErrorKind::InvalidResponse)
            .with_message(format!("unexpected page shape: {other}"))),
    }
}
