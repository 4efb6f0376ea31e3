pub(crate) mod message;

use std::sync::Arc;
use log::{debug, info, warn};
use hudsucker::{
    async_trait::async_trait,
    hyper::{
        body::Bytes,
        header::CONTENT_ENCODING,
        Body,
        Method,
        Request,
        Response
    },
    HttpContext,
    HttpHandler,
    RequestOrResponse
};

use crate::{
    directive::Phase,
    invoker::{BodyJson, TransformInvoker, TransformPayload},
    pattern::TargetRule
};

/// Everything the engine shares between connections. Built once at startup, read-only after.
pub struct EngineContext {
    pub rule: TargetRule,
    pub invoker: TransformInvoker
}

/// What the request phase learned about an exchange, consulted when its response arrives
#[derive(Clone, Debug)]
pub struct Exchange {
    pub method: Method,
    pub url: String,
    pub matched: bool,
    pub request_had_body: bool
}

impl Exchange {
    fn response_wanted(&self) -> bool {
        self.matched && (self.request_had_body || self.method == Method::GET)
    }
}

#[derive(Clone)]
pub struct InterceptionEngine {
    ctx: Arc<EngineContext>
}

impl InterceptionEngine {
    pub fn new(ctx: EngineContext) -> Self {
        InterceptionEngine {
            ctx: Arc::new(ctx)
        }
    }

    pub fn rule(&self) -> &TargetRule {
        &self.ctx.rule
    }

    pub async fn process_request(&self, req: Request<Body>) -> (Exchange, RequestOrResponse) {
        let url = req.uri().to_string();
        let exchange = Exchange {
            method: req.method().clone(),
            matched: self.ctx.rule.matches(&url),
            request_had_body: message::carries_body(req.method(), req.headers()),
            url
        };

        if !exchange.matched || !exchange.request_had_body {
            debug!("==> {} {} passed through", &exchange.method, &exchange.url);
            return (exchange, RequestOrResponse::Request(req));
        }

        let (mut parts, body) = req.into_parts();
        let raw = match message::read_body(body).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("==> {} {}: could not read request body: {}", &exchange.method, &exchange.url, err);
                return (exchange, RequestOrResponse::Response(message::bad_gateway()));
            }
        };

        let plain = message::plain_request_body(&parts.headers, &raw).await;
        let new_body = self.transform(&exchange, Phase::Request, &mut parts.headers, raw, plain).await;
        message::set_framing(&mut parts.headers, new_body.len());

        (exchange, RequestOrResponse::Request(Request::from_parts(parts, Body::from(new_body))))
    }

    pub async fn process_response(&self, exchange: &Exchange, res: Response<Body>) -> Response<Body> {
        if !exchange.response_wanted() || message::bodyless_status(res.status()) {
            debug!("<== {} {} passed through", &exchange.method, &exchange.url);
            return res;
        }

        let (mut parts, body) = res.into_parts();
        let raw = match message::read_body(body).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("<== {} {}: could not read response body: {}", &exchange.method, &exchange.url, err);
                return message::bad_gateway();
            }
        };

        let plain = message::plain_response_body(&parts.headers, &raw).await;
        let new_body = self.transform(exchange, Phase::Response, &mut parts.headers, raw, plain).await;
        message::set_framing(&mut parts.headers, new_body.len());

        Response::from_parts(parts, Body::from(new_body))
    }

    /// Runs the transformer over an already read body and returns the bytes to forward:
    /// either the replacement or `raw` untouched. A body that cannot be decoded (`plain`
    /// is `None`) is never shown to the transformer.
    async fn transform(
        &self,
        exchange: &Exchange,
        phase: Phase,
        headers: &mut http::HeaderMap,
        raw: Bytes,
        plain: Option<Bytes>
    ) -> Bytes {
        let body = match plain.as_ref() {
            Some(plain) => BodyJson::parse(plain),
            None => {
                debug!(
                    "{} body of {} {} has an unsupported content-encoding, passed through",
                    phase,
                    &exchange.method,
                    &exchange.url
                );
                return raw;
            }
        };
        if body == BodyJson::Unparsable {
            debug!("{} body of {} {} is not a JSON object, sending {{}}", phase, &exchange.method, &exchange.url);
        }

        let payload = TransformPayload::new(exchange.method.as_str(), &exchange.url, phase, body);
        let directive = self.ctx.invoker.invoke(&payload).await;

        return match directive.replacement_bytes() {
            Some(replacement) => {
                info!(
                    "Rewrote {} body of {} {} ({} -> {} bytes)",
                    phase,
                    &exchange.method,
                    &exchange.url,
                    raw.len(),
                    replacement.len()
                );
                headers.remove(CONTENT_ENCODING);
                Bytes::from(replacement)
            },
            None => raw
        };
    }
}

// ---------------------------------------------------------------------------------------------- //

/// hudsucker glue. hudsucker clones the handler for every request, so `exchange` always
/// belongs to the request whose response comes next.
#[derive(Clone)]
pub struct InterceptHandler {
    engine: InterceptionEngine,
    exchange: Option<Exchange>
}

impl InterceptHandler {
    pub fn new(engine: InterceptionEngine) -> Self {
        InterceptHandler {
            engine,
            exchange: None
        }
    }
}

#[async_trait]
impl HttpHandler for InterceptHandler {
    async fn handle_request(&mut self, _ctx: &HttpContext, req: Request<Body>) -> RequestOrResponse {
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req);
        }

        let (exchange, ror) = self.engine.process_request(req).await;
        self.exchange = Some(exchange);
        ror
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        match self.exchange.take() {
            Some(exchange) => self.engine.process_response(&exchange, res).await,
            None => res
        }
    }
}
