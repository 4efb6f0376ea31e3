#![cfg(unix)]

use std::{convert::Infallible, fs, net::SocketAddr, time::Duration};

use hyper::{
    service::{make_service_fn, service_fn},
    Body,
    Request,
    Response,
    Server
};
use midnight_proxy::{
    config::RuntimeConfig,
    CaMaterial,
    EngineContext,
    InterceptionEngine,
    ProxyService,
    TargetRule,
    TransformInvoker
};
use tempfile::NamedTempFile;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream
};

async fn echo(req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let body = hyper::body::to_bytes(req.into_body()).await?;
    Ok(Response::new(Body::from(body)))
}

fn spawn_upstream() -> SocketAddr {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(echo)) });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

fn free_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn engine(script: &NamedTempFile) -> InterceptionEngine {
    InterceptionEngine::new(
        EngineContext {
            rule: TargetRule::compile("example.com").unwrap(),
            invoker: TransformInvoker::new(
                script.path().to_path_buf(),
                RuntimeConfig { program: "sh".to_string(), args: vec!["-c".to_string()] },
                Duration::from_secs(5)
            )
        }
    )
}

async fn connect_with_retry(addr: SocketAddr) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("proxy did not start listening on {}", addr);
}

#[tokio::test]
async fn plain_http_to_other_hosts_is_relayed_unchanged() {
    let script = NamedTempFile::new().unwrap();
    fs::write(script.path(), "echo '@BODY { y: \"2\" }'").unwrap();

    let upstream = spawn_upstream();
    let proxy_addr = free_port();
    let handle = ProxyService::new(proxy_addr, CaMaterial::load().unwrap(), 10, engine(&script))
        .start()
        .unwrap();
    assert_eq!(handle.addr(), proxy_addr);

    let mut stream = connect_with_retry(proxy_addr).await;
    let request = format!(
        "POST http://{0}/echo HTTP/1.1\r\nHost: {0}\r\nContent-Type: application/json\r\nContent-Length: 7\r\nConnection: close\r\n\r\n{{\"x\":1}}",
        upstream
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&raw);

    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.ends_with("{\"x\":1}"), "{}", response);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn taken_port_stops_the_proxy_with_an_error() {
    let script = NamedTempFile::new().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = occupied.local_addr().unwrap();

    let mut handle = ProxyService::new(addr, CaMaterial::load().unwrap(), 10, engine(&script))
        .start()
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), handle.wait()).await.unwrap();
    assert!(result.is_err());
    drop(occupied);
}
