//! Streaming HTML attribute rewriting.
//!
//! # Data Flow
//! ```text
//! upstream body chunks
//!     → rewrite task: HtmlRewriteStage::push per chunk
//!     → bounded channel
//!     → outbound body stream
//! ```
//!
//! # Design Decisions
//! - Attribute values are rewritten on the token stream; the document is
//!   never parsed into a tree or buffered whole
//! - Everything outside the intercepted attributes is emitted byte-identical
//! - The output channel is bounded, so the client's read rate gates how much
//!   upstream body is pulled
//! - Dropping the outbound stream ends the rewrite task, which drops the
//!   upstream body

use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use lol_html::errors::RewritingError;
use lol_html::send::{ElementContentHandlers, HtmlRewriter, Settings};
use lol_html::{element, Selector};
use tokio::sync::mpsc;

use crate::error::ProxyError;
use crate::rewrite::context::{RequestContext, RewriteConfig};
use crate::rewrite::url::{rewrite_meta_content, rewrite_url, rewrite_url_list};

/// How an intercepted attribute value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// A single URL.
    Url,
    /// A `srcset`-style candidate list.
    UrlList,
    /// A `<meta content>` value, possibly in refresh form.
    MetaContent,
}

impl AttributeKind {
    fn apply(self, value: &str, ctx: &RequestContext, cfg: &RewriteConfig) -> String {
        match self {
            AttributeKind::Url => rewrite_url(value, ctx, cfg),
            AttributeKind::UrlList => rewrite_url_list(value, ctx, cfg),
            AttributeKind::MetaContent => rewrite_meta_content(value, ctx, cfg),
        }
    }
}

/// Element selector, attribute name and value interpretation.
pub const INTERCEPTED_ATTRIBUTES: &[(&str, &str, AttributeKind)] = &[
    ("a[href]", "href", AttributeKind::Url),
    ("link[href]", "href", AttributeKind::Url),
    ("img[src]", "src", AttributeKind::Url),
    ("script[src]", "src", AttributeKind::Url),
    ("source[src]", "src", AttributeKind::Url),
    ("source[srcset]", "srcset", AttributeKind::UrlList),
    ("img[srcset]", "srcset", AttributeKind::UrlList),
    ("form[action]", "action", AttributeKind::Url),
    ("meta[content]", "content", AttributeKind::MetaContent),
];

type Sink = Box<dyn FnMut(&[u8]) + Send>;
type Output = Arc<Mutex<Vec<u8>>>;

/// Push-based rewrite stage: feed it upstream chunks, get rewritten bytes back.
///
/// Output for a chunk may be empty when a tag straddles a chunk boundary;
/// the held bytes come out with a later chunk or from [`finish`](Self::finish).
/// The stage is `Send`, so it can be driven from an ordinary async task.
pub struct HtmlRewriteStage {
    rewriter: HtmlRewriter<'static, Sink>,
    output: Output,
}

impl HtmlRewriteStage {
    pub fn new(cfg: Arc<RewriteConfig>, ctx: Arc<RequestContext>) -> Self {
        let output: Output = Arc::new(Mutex::new(Vec::new()));

        let element_content_handlers = INTERCEPTED_ATTRIBUTES
            .iter()
            .map(|(selector, attribute, kind)| {
                attribute_handler(selector, attribute, *kind, cfg.clone(), ctx.clone())
            })
            .collect();

        let sink_output = output.clone();
        let sink: Sink = Box::new(move |chunk: &[u8]| {
            sink_output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(chunk)
        });

        let rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers,
                ..Settings::new_send()
            },
            sink,
        );

        Self { rewriter, output }
    }

    /// Feed one upstream chunk and return whatever output it released.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Bytes, RewritingError> {
        self.rewriter.write(chunk)?;
        Ok(take_output(&self.output))
    }

    /// Signal end of document and return the remaining output.
    pub fn finish(self) -> Result<Bytes, RewritingError> {
        let Self { rewriter, output } = self;
        rewriter.end()?;
        Ok(take_output(&output))
    }
}

fn take_output(output: &Output) -> Bytes {
    let mut buf = output.lock().unwrap_or_else(PoisonError::into_inner);
    Bytes::from(std::mem::take(&mut *buf))
}

fn attribute_handler(
    selector: &str,
    attribute: &'static str,
    kind: AttributeKind,
    cfg: Arc<RewriteConfig>,
    ctx: Arc<RequestContext>,
) -> (Cow<'static, Selector>, ElementContentHandlers<'static>) {
    element!(selector, move |el| {
        let Some(value) = el.get_attribute(attribute) else {
            return Ok(());
        };
        if value.is_empty() {
            return Ok(());
        }

        let rewritten = kind.apply(&value, &ctx, &cfg);
        if rewritten != value {
            tracing::trace!(
                element = %el.tag_name(),
                attribute = attribute,
                from = %value,
                to = %rewritten,
                "Rewrote attribute"
            );
            el.set_attribute(attribute, &rewritten)?;
        }
        Ok(())
    })
}

/// Rewrite a complete in-memory document. Used by the CLI and tests.
pub fn rewrite_html(
    input: &[u8],
    cfg: Arc<RewriteConfig>,
    ctx: Arc<RequestContext>,
) -> Result<Vec<u8>, RewritingError> {
    let mut stage = HtmlRewriteStage::new(cfg, ctx);
    let mut output = stage.push(input)?.to_vec();
    output.extend_from_slice(&stage.finish()?);
    Ok(output)
}

/// Pipe an HTML body stream through the attribute rewriter.
///
/// At most `capacity` rewritten chunks are buffered ahead of the client.
/// An upstream error ends the output stream with [`ProxyError::UpstreamBody`].
pub fn transform_html_body<S, E>(
    body: S,
    ctx: Arc<RequestContext>,
    cfg: Arc<RewriteConfig>,
    capacity: usize,
) -> impl Stream<Item = Result<Bytes, ProxyError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, ProxyError>>(capacity.max(1));

    tokio::spawn(rewrite_body(body, HtmlRewriteStage::new(cfg, ctx), tx));

    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

/// Pull upstream chunks through `stage` until the body ends or the client leaves.
async fn rewrite_body<S, E>(body: S, mut stage: HtmlRewriteStage, tx: mpsc::Sender<Result<Bytes, ProxyError>>)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::pin_mut!(body);

    loop {
        let item = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("Client went away, abandoning upstream body");
                return;
            }
            item = body.next() => item,
        };

        let chunk = match item {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Upstream body failed mid-stream");
                let _ = tx.send(Err(ProxyError::UpstreamBody(e.to_string()))).await;
                return;
            }
            None => break,
        };

        let out = stage.push(&chunk).map_err(|e| ProxyError::Rewrite(e.to_string()));
        match out {
            Ok(out) if out.is_empty() => {}
            Ok(out) => {
                if tx.send(Ok(out)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "HTML rewriting failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }

    match stage.finish().map_err(|e| ProxyError::Rewrite(e.to_string())) {
        Ok(out) if out.is_empty() => {}
        Ok(out) => {
            let _ = tx.send(Ok(out)).await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "HTML rewriting failed at end of document");
            let _ = tx.send(Err(e)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::config::schema::{HostMapping, ProxyConfig};

    /// Sets its flag when dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn config() -> Arc<RewriteConfig> {
        let mut config = ProxyConfig::default();
        config.upstream.origin = "https://upstream.test".into();
        config.upstream.local_prefix = "/a".into();
        config.host_map = vec![HostMapping::new("github.com", "facebook.com")];
        Arc::new(RewriteConfig::resolve(&config).unwrap())
    }

    fn ctx() -> Arc<RequestContext> {
        Arc::new(RequestContext::new("https://mirror.test"))
    }

    fn rewrite(input: &str) -> String {
        String::from_utf8(rewrite_html(input.as_bytes(), config(), ctx()).unwrap()).unwrap()
    }

    #[test]
    fn test_protocol_relative_img() {
        assert_eq!(
            rewrite(r#"<p>hi</p><img src="//github.com/a.png"><p>bye</p>"#),
            r#"<p>hi</p><img src="https://facebook.com/a.png"><p>bye</p>"#
        );
    }

    #[test]
    fn test_intercepted_attributes() {
        let input = concat!(
            r#"<a href="https://upstream.test/docs">d</a>"#,
            r#"<link href="/style.css">"#,
            r#"<script src="https://github.com/app.js"></script>"#,
            r#"<form action="/login"></form>"#,
            r#"<picture><source srcset="/img/a.png 1x, https://github.com/b.png 2x"></picture>"#,
        );
        let expected = concat!(
            r#"<a href="https://mirror.test/a/docs">d</a>"#,
            r#"<link href="/a/style.css">"#,
            r#"<script src="https://facebook.com/app.js"></script>"#,
            r#"<form action="/a/login"></form>"#,
            r#"<picture><source srcset="/a/img/a.png 1x, https://facebook.com/b.png 2x"></picture>"#,
        );
        assert_eq!(rewrite(input), expected);
    }

    #[test]
    fn test_meta_refresh() {
        assert_eq!(
            rewrite(r#"<meta http-equiv="refresh" content="0;url=https://upstream.test/next">"#),
            r#"<meta http-equiv="refresh" content="0;url=https://mirror.test/a/next">"#
        );
    }

    #[test]
    fn test_untouched_markup_is_byte_identical() {
        let input = concat!(
            "<!DOCTYPE html>\n<html><head><title>T</title>",
            "<style>body { background: url(/bg.png) }</style>",
            "<script>var u = 'https://github.com/x';</script></head>",
            "<body><!-- /comment --><a name=top>x</a>",
            "<div data-src=\"/not-intercepted\">text &amp; more</div>",
            "<a href=\"\">empty</a><a href=\"#frag\">f</a>",
            "<img src=\"data:image/png;base64,AAAA\"></body></html>",
        );
        assert_eq!(rewrite(input), input);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let input = r#"<div class="x"><img alt="a" src="/img/a.png" width="10"><a href="//github.com/u">u</a></div>"#;
        let whole = rewrite(input);

        let mut stage = HtmlRewriteStage::new(config(), ctx());
        let mut output = Vec::new();
        for byte in input.as_bytes() {
            output.extend_from_slice(&stage.push(std::slice::from_ref(byte)).unwrap());
        }
        output.extend_from_slice(&stage.finish().unwrap());

        assert_eq!(String::from_utf8(output).unwrap(), whole);
        assert_eq!(
            whole,
            r#"<div class="x"><img alt="a" src="/a/img/a.png" width="10"><a href="https://facebook.com/u">u</a></div>"#
        );
    }

    #[test]
    fn test_push_emits_before_end_of_stream() {
        let mut stage = HtmlRewriteStage::new(config(), ctx());
        let first = stage.push(b"<p>first paragraph</p><a href=\"/x\">").unwrap();
        assert!(!first.is_empty());
        let _ = stage.finish().unwrap();
    }

    #[tokio::test]
    async fn test_stream_pipeline_preserves_order() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"<html><body><a hr")),
            Ok(Bytes::from_static(b"ef=\"/one\">1</a>")),
            Ok(Bytes::from_static(b"<img src=\"https://github.com/2.png\">")),
            Ok(Bytes::from_static(b"</body></html>")),
        ];

        let output = transform_html_body(futures_util::stream::iter(chunks), ctx(), config(), 2);
        let parts: Vec<Result<Bytes, ProxyError>> = output.collect().await;

        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(&part.unwrap());
        }
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"<html><body><a href="/a/one">1</a><img src="https://facebook.com/2.png"></body></html>"#
        );
    }

    #[tokio::test]
    async fn test_stream_pipeline_surfaces_upstream_error() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"<p>partial</p>")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];

        let output = transform_html_body(futures_util::stream::iter(chunks), ctx(), config(), 4);
        let parts: Vec<Result<Bytes, ProxyError>> = output.collect().await;

        assert!(matches!(parts.last(), Some(Err(ProxyError::UpstreamBody(_)))));
    }

    #[test]
    fn test_stage_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<HtmlRewriteStage>();
    }

    #[tokio::test]
    async fn test_dropping_output_drops_upstream_body() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());

        let first: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"<p>first</p>"))];
        let body = futures_util::stream::iter(first)
            .chain(futures_util::stream::pending())
            .map(move |item| {
                let _ = &flag;
                item
            });

        let output = transform_html_body(body, ctx(), config(), 2);
        futures_util::pin_mut!(output);
        let chunk = output.next().await.unwrap().unwrap();
        assert!(chunk.starts_with(b"<p>first"));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(output);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("upstream body should be dropped once the client goes away");
    }

    #[tokio::test]
    async fn test_slow_client_bounds_upstream_reads() {
        let capacity = 2;
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let body = futures_util::stream::repeat_with(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Bytes::from_static(b"<p>x</p>"))
        });

        let output = transform_html_body(body, ctx(), config(), capacity);
        futures_util::pin_mut!(output);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = pulled.load(Ordering::SeqCst);
        assert!(before > 0);
        assert!(before <= capacity + 2, "pulled {} chunks with nobody reading", before);

        output.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = pulled.load(Ordering::SeqCst);
        assert!(after > before);
        assert!(after <= capacity + 3, "pulled {} chunks after one read", after);
    }
}
