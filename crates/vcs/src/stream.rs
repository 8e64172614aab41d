use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::OwnedRwLockReadGuard;

use crate::command::RecordReader;
use crate::error::VcsError;
use crate::types::{LogQuery, Revision};

/// One parsed log record, before filtering and pagination
#[derive(Debug)]
pub(crate) struct LogRecord {
    pub author_name: String,
    pub author_email: String,
    pub revision: Revision,
}

/// Turns a raw record into a [`LogRecord`]; `None` drops it from the results
pub(crate) type RecordParser = Box<dyn FnMut(&str, Vec<u8>) -> Result<Option<LogRecord>, VcsError> + Send>;

/// Lazy, finite, non-restartable sequence of revisions from one `log` call.
///
/// Backed by a live external process. Dropping the stream before the end
/// kills that process and releases the working copy read lock.
pub struct LogStream {
    inner: BoxStream<'static, Result<Revision, VcsError>>,
}

struct State {
    reader: RecordReader,
    parse: RecordParser,
    query: LogQuery,
    skipped: usize,
    yielded: usize,
    _guard: OwnedRwLockReadGuard<()>,
}

impl LogStream {
    pub(crate) fn from_reader(
        reader: RecordReader,
        parse: RecordParser,
        query: LogQuery,
        guard: OwnedRwLockReadGuard<()>,
    ) -> Self {
        let state = State {
            reader,
            parse,
            query,
            skipped: 0,
            yielded: 0,
            _guard: guard,
        };

        let inner = stream::try_unfold(state, |mut state| async move {
            if state.query.limit.is_some_and(|limit| state.yielded >= limit) {
                return Ok(None);
            }
            loop {
                let Some(raw) = state.reader.next_record().await? else {
                    return Ok(None);
                };
                let Some(record) = (state.parse)(state.reader.command(), raw)? else {
                    continue;
                };
                if !state
                    .query
                    .matches_author(&record.author_name, &record.author_email)
                {
                    continue;
                }
                if state.skipped < state.query.offset {
                    state.skipped += 1;
                    continue;
                }
                state.yielded += 1;
                return Ok(Some((record.revision, state)));
            }
        });

        Self {
            inner: inner.boxed(),
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: stream::empty().boxed(),
        }
    }

    /// Drain the remaining revisions into a vector
    pub async fn try_collect_vec(self) -> Result<Vec<Revision>, VcsError> {
        self.try_collect().await
    }
}

impl Stream for LogStream {
    type Item = Result<Revision, VcsError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream").finish_non_exhaustive()
    }
}
