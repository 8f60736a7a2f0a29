//! Streaming the parent collection in fixed-size batches.
//!
//! The store is read page by page using keyset pagination on `_id`, and pages are re-chunked
//! into batches of the configured join size. Page size and batch size are independent.

use core::pin::Pin;
use core::task::{Context, Poll};

use futures::{Stream, ready, stream};
use pin_project_lite::pin_project;

use crate::document::{Document, document_id};
use crate::error::MergeResult;
use crate::key::JoinKey;
use crate::store::{DocumentStore, PageQuery};

pin_project! {
    /// A stream adapter that re-chunks a stream of pages into batches of a fixed size.
    ///
    /// Every batch except possibly the last one holds exactly `size` documents. An error from
    /// the inner stream is forwarded and ends the stream.
    #[must_use = "streams do nothing unless polled"]
    #[derive(Debug)]
    pub struct Rechunk<S> {
        #[pin]
        stream: S,
        size: usize,
        buffer: Vec<Document>,
        inner_stream_ended: bool,
    }
}

impl<S> Rechunk<S>
where
    S: Stream<Item = MergeResult<Vec<Document>>>,
{
    /// Wraps `stream`, emitting batches of `size` documents. A size of zero is treated as one.
    pub fn wrap(stream: S, size: usize) -> Self {
        let size = size.max(1);
        Self {
            stream,
            size,
            buffer: Vec::with_capacity(size),
            inner_stream_ended: false,
        }
    }
}

impl<S> Stream for Rechunk<S>
where
    S: Stream<Item = MergeResult<Vec<Document>>>,
{
    type Item = MergeResult<Vec<Document>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if this.buffer.len() >= *this.size {
                let rest = this.buffer.split_off(*this.size);
                let batch = std::mem::replace(this.buffer, rest);
                return Poll::Ready(Some(Ok(batch)));
            }

            if *this.inner_stream_ended {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Ok(std::mem::take(this.buffer))));
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(page)) => this.buffer.extend(page),
                Some(Err(err)) => {
                    *this.inner_stream_ended = true;
                    this.buffer.clear();
                    return Poll::Ready(Some(Err(err)));
                }
                None => *this.inner_stream_ended = true,
            }
        }
    }
}

/// Streams pages of `collection` matching `query`, advancing the keyset after each page.
pub fn pages<'a, S>(
    store: &'a S,
    collection: &'a str,
    query: PageQuery,
) -> impl Stream<Item = MergeResult<Vec<Document>>> + 'a
where
    S: DocumentStore,
{
    stream::try_unfold(Some(query), move |state| next_page(store, collection, state))
}

type PageStep = Option<(Vec<Document>, Option<PageQuery>)>;

async fn next_page<S>(store: &S, collection: &str, state: Option<PageQuery>) -> MergeResult<PageStep>
where
    S: DocumentStore,
{
    let Some(mut query) = state else {
        return Ok(None);
    };

    let page = store.find_page(collection, &query).await?;
    if page.is_empty() {
        return Ok(None);
    }

    // A short page is the last one.
    let next = if page.len() < query.limit {
        None
    } else {
        query.after = page.last().and_then(document_id).cloned().map(JoinKey::new);
        query.after.is_some().then_some(query)
    };

    Ok(Some((page, next)))
}

/// Streams batches of `batch_size` documents of `collection` matching `query`.
pub fn batches<'a, S>(
    store: &'a S,
    collection: &'a str,
    query: PageQuery,
    batch_size: usize,
) -> Rechunk<impl Stream<Item = MergeResult<Vec<Document>>> + 'a>
where
    S: DocumentStore,
{
    Rechunk::wrap(pages(store, collection, query), batch_size)
}
