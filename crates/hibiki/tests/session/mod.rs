use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use hibiki::{
    FetchOptions, GetRequest, HttpUrlSource, ProxyCache, ProxyCacheConfig, RangeSession,
    ValidRegion,
};

use crate::{scripted::sample_data, setup_tracing, source::setup_video_server};

async fn setup_session(
    cache_root: &Path,
    url: &str,
) -> anyhow::Result<(ProxyCache<HttpUrlSource>, RangeSession<HttpUrlSource>)> {
    setup_tracing();
    let config = ProxyCacheConfig::builder()
        .cache_root(cache_root)
        .timeout(Duration::from_secs(5))
        .fetch_options(FetchOptions {
            wait_interval: Duration::from_millis(200),
            error_pause: Duration::from_millis(10),
            transient_backoff: Duration::from_millis(10),
            ..Default::default()
        })
        .build()?;
    let proxy = config.proxy_cache(url).await?;
    let session = RangeSession::new(proxy.clone());
    Ok((proxy, session))
}

async fn respond(session: &RangeSession<HttpUrlSource>, request: &str) -> anyhow::Result<Vec<u8>> {
    let request = GetRequest::parse(request)?;
    let mut out = Vec::new();
    session.process_request(&request, &mut out).await?;
    Ok(out)
}

fn split_head(response: &[u8]) -> (String, &[u8]) {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| p + 4)
        .unwrap_or(response.len());
    (
        String::from_utf8_lossy(&response[..end]).to_string(),
        &response[end..],
    )
}

#[tokio::test]
async fn plain_request_streams_whole_resource() -> anyhow::Result<()> {
    let data = sample_data(20_000);
    let server = setup_video_server(data.clone()).await;
    let dir = tempfile::tempdir()?;
    let url = format!("{}/video.mp4", server.uri());
    let (proxy, session) = setup_session(dir.path(), &url).await?;

    let response = respond(&session, "GET /video.mp4 HTTP/1.1\r\nHost: localhost\r\n").await?;
    let (head, body) = split_head(&response);
    assert_eq!(
        head,
        "HTTP/1.1 200 OK\r\n\
         Accept-Ranges: bytes\r\n\
         Content-Length: 20000\r\n\
         Content-Type: video/mp4\r\n\r\n"
    );
    assert_eq!(body, &data[..]);
    assert!(proxy.cache().is_completed().await);
    assert_eq!(proxy.fetches_started(), 1);

    Ok(())
}

#[tokio::test]
async fn range_outside_cache_restarts_fetch() -> anyhow::Result<()> {
    let data = sample_data(20_000);
    let server = setup_video_server(data.clone()).await;
    let dir = tempfile::tempdir()?;
    let url = format!("{}/video.mp4", server.uri());
    let (proxy, session) = setup_session(dir.path(), &url).await?;

    let request = GetRequest::parse("GET /video.mp4 HTTP/1.1\r\nRange: bytes=500-\r\n")?;
    assert!(!session.is_use_cache(&request).await?);

    let response = respond(&session, "GET /video.mp4 HTTP/1.1\r\nRange: bytes=500-\r\n").await?;
    let (head, body) = split_head(&response);
    assert_eq!(
        head,
        "HTTP/1.1 206 PARTIAL CONTENT\r\n\
         Accept-Ranges: bytes\r\n\
         Content-Length: 19500\r\n\
         Content-Range: bytes 500-19999/20000\r\n\
         Content-Type: video/mp4\r\n\r\n"
    );
    assert_eq!(body, &data[500..]);

    assert_eq!(proxy.cache().region().await, ValidRegion::new(500, 20_000));
    assert!(!proxy.cache().is_completed().await);

    Ok(())
}

#[tokio::test]
async fn range_inside_complete_cache_is_served_from_disk() -> anyhow::Result<()> {
    let data = sample_data(20_000);
    let server = setup_video_server(data.clone()).await;
    let dir = tempfile::tempdir()?;
    let url = format!("{}/video.mp4", server.uri());
    let (proxy, session) = setup_session(dir.path(), &url).await?;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let recorded = progress.clone();
    session.register_cache_listener(Arc::new(move |_: &Path, _: &str, percents: u8| {
        recorded.lock().unwrap().push(percents);
    }));

    respond(&session, "GET /video.mp4 HTTP/1.1\r\n").await?;
    assert_eq!(progress.lock().unwrap().last(), Some(&100));

    let request = GetRequest::parse("GET /video.mp4 HTTP/1.1\r\nRange: bytes=19990-\r\n")?;
    assert!(session.is_use_cache(&request).await?);

    let response = respond(&session, "GET /video.mp4 HTTP/1.1\r\nRange: bytes=19990-\r\n").await?;
    let (head, body) = split_head(&response);
    assert_eq!(
        head,
        "HTTP/1.1 206 PARTIAL CONTENT\r\n\
         Accept-Ranges: bytes\r\n\
         Content-Length: 10\r\n\
         Content-Range: bytes 19990-19999/20000\r\n\
         Content-Type: video/mp4\r\n\r\n"
    );
    assert_eq!(body, &data[19_990..]);
    assert_eq!(proxy.fetches_started(), 1);

    Ok(())
}

#[tokio::test]
async fn cache_file_is_reused_by_a_new_engine() -> anyhow::Result<()> {
    let data = sample_data(4096);
    let server = setup_video_server(data.clone()).await;
    let dir = tempfile::tempdir()?;
    let url = format!("{}/video.mp4", server.uri());

    let (proxy, session) = setup_session(dir.path(), &url).await?;
    respond(&session, "GET /video.mp4 HTTP/1.1\r\n").await?;
    proxy.shutdown().await;

    let (proxy, session) = setup_session(dir.path(), &url).await?;
    assert!(proxy.cache().is_completed().await);
    let response = respond(&session, "GET /video.mp4 HTTP/1.1\r\n").await?;
    let (_, body) = split_head(&response);
    assert_eq!(body, &data[..]);
    assert_eq!(proxy.fetches_started(), 0);

    Ok(())
}

#[tokio::test]
async fn range_past_the_end_is_not_satisfiable() -> anyhow::Result<()> {
    let data = sample_data(20_000);
    let server = setup_video_server(data.clone()).await;
    let dir = tempfile::tempdir()?;
    let url = format!("{}/video.mp4", server.uri());
    let (proxy, session) = setup_session(dir.path(), &url).await?;

    respond(&session, "GET /video.mp4 HTTP/1.1\r\n").await?;
    assert!(proxy.cache().is_completed().await);

    for range in ["20000-", "25000-"] {
        let request = format!("GET /video.mp4 HTTP/1.1\r\nRange: bytes={range}\r\n");
        let response = respond(&session, &request).await?;
        let (head, body) = split_head(&response);
        assert_eq!(
            head,
            "HTTP/1.1 416 REQUESTED RANGE NOT SATISFIABLE\r\n\
             Accept-Ranges: bytes\r\n\
             Content-Range: bytes */20000\r\n\r\n"
        );
        assert!(body.is_empty());
    }

    // the complete cache is left alone
    assert!(proxy.cache().is_completed().await);
    assert_eq!(proxy.cache().region().await, ValidRegion::new(0, 20_000));
    assert_eq!(proxy.fetches_started(), 1);
    assert_eq!(std::fs::metadata(proxy.cache().path())?.len(), 20_000);

    Ok(())
}
