//! End-to-end tests driving the handler with plain `http` requests
//! against the in-memory backend.
use dav_engine::{Body, DavHandler, LockManager, MemBackend};
use futures_util::StreamExt;
use http::{Request, Response, StatusCode};

async fn resp_to_string(mut resp: Response<Body>) -> String {
    let mut data = Vec::new();
    let body = resp.body_mut();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk.expect("error reading body stream"));
    }
    String::from_utf8(data).unwrap_or_default()
}

fn count_matches(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

// backend seeded with a small tree, plus the handler serving it.
async fn setup() -> (MemBackend, DavHandler) {
    let _ = env_logger::builder().is_test(true).try_init();
    let be = MemBackend::with_mimecheck(true);
    be.add_object("/a.txt", b"initial content").await;
    be.add_object("/b.txt", b"other content").await;
    be.add_collection("/d/").await;
    be.add_object("/d/a.txt", b"one").await;
    be.add_object("/d/b.txt", b"two").await;
    let handler = DavHandler::builder()
        .backend(Box::new(be.clone()))
        .locksystem(LockManager::new())
        .build_handler();
    (be, handler)
}

fn req(method: &str, uri: &str) -> http::request::Builder {
    Request::builder().method(method).uri(uri)
}

const LOCKINFO_EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>user</D:href></D:owner>
</D:lockinfo>"#;

const LOCKINFO_SHARED: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>user</D:href></D:owner>
</D:lockinfo>"#;

// grab the bare token out of the Lock-Token response header.
fn lock_token(resp: &Response<Body>) -> String {
    let v = resp
        .headers()
        .get("lock-token")
        .expect("Lock-Token header")
        .to_str()
        .unwrap();
    assert!(v.starts_with("<opaquelocktoken:") && v.ends_with('>'));
    v["<opaquelocktoken:".len()..v.len() - 1].to_string()
}

#[tokio::test]
async fn lock_then_overwrite() {
    let (_, server) = setup().await;

    let resp = server
        .handle(
            req("LOCK", "/a.txt")
                .header("Timeout", "Second-300")
                .body(Body::from(LOCKINFO_EXCLUSIVE))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);
    let body = resp_to_string(resp).await;
    assert!(body.contains("lockdiscovery"));
    assert!(body.contains(&token));

    // no token, no write.
    let resp = server
        .handle(req("PUT", "/a.txt").body(Body::from("hello")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    // same PUT, now presenting the token.
    let resp = server
        .handle(
            req("PUT", "/a.txt")
                .header("If", format!("(<opaquelocktoken:{}>)", token))
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn lock_unlock_roundtrip() {
    let (_, server) = setup().await;

    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_EXCLUSIVE)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token = lock_token(&resp);

    // a second exclusive lock is refused while the first is alive.
    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_EXCLUSIVE)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);

    let resp = server
        .handle(
            req("UNLOCK", "/a.txt")
                .header("Lock-Token", format!("<opaquelocktoken:{}>", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    // unlocked again: an identical LOCK succeeds.
    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_EXCLUSIVE)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn exclusive_lock_guards_every_mutation() {
    let (_, server) = setup().await;

    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_EXCLUSIVE)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let cases: Vec<Request<Body>> = vec![
        req("PUT", "/a.txt").body(Body::from("x")).unwrap(),
        req("DELETE", "/a.txt").body(Body::empty()).unwrap(),
        req("PROPPATCH", "/a.txt")
            .body(Body::from(
                r#"<?xml version="1.0"?>
                <D:propertyupdate xmlns:D="DAV:" xmlns:Z="urn:z">
                  <D:set><D:prop><Z:a>v</Z:a></D:prop></D:set>
                </D:propertyupdate>"#,
            ))
            .unwrap(),
        req("MOVE", "/a.txt")
            .header("Destination", "/moved.txt")
            .body(Body::empty())
            .unwrap(),
        // COPY onto the locked resource.
        req("COPY", "/b.txt")
            .header("Destination", "/a.txt")
            .body(Body::empty())
            .unwrap(),
    ];
    for r in cases {
        let method = r.method().clone();
        let resp = server.handle(r).await;
        assert_eq!(resp.status(), StatusCode::LOCKED, "method {}", method);
    }
}

#[tokio::test]
async fn shared_locks_coexist() {
    let (_, server) = setup().await;

    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_SHARED)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // another shared lock is fine.
    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_SHARED)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // an exclusive one is not.
    let resp = server
        .handle(req("LOCK", "/a.txt").body(Body::from(LOCKINFO_EXCLUSIVE)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn lock_refresh() {
    let (_, server) = setup().await;

    let resp = server
        .handle(
            req("LOCK", "/a.txt")
                .header("Timeout", "Second-300")
                .body(Body::from(LOCKINFO_EXCLUSIVE))
                .unwrap(),
        )
        .await;
    let token = lock_token(&resp);

    // refresh: no body, token in If.
    let resp = server
        .handle(
            req("LOCK", "/a.txt")
                .header("If", format!("(<opaquelocktoken:{}>)", token))
                .header("Timeout", "Second-600")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp_to_string(resp).await;
    assert!(body.contains("Second-600"));

    // refresh with an unknown token fails the precondition.
    let resp = server
        .handle(
            req("LOCK", "/a.txt")
                .header(
                    "If",
                    "(<opaquelocktoken:00000000-0000-0000-0000-000000000000>)",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn unlock_rejects_malformed_token() {
    let (_, server) = setup().await;
    let resp = server
        .handle(
            req("UNLOCK", "/a.txt")
                .header("Lock-Token", "garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // a well-formed but unknown token still unlocks to 204.
    let resp = server
        .handle(
            req("UNLOCK", "/a.txt")
                .header(
                    "Lock-Token",
                    "<opaquelocktoken:11111111-2222-3333-4444-555555555555>",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn propfind_depth_counts() {
    let (_, server) = setup().await;

    // depth 0: the collection itself.
    let resp = server
        .handle(req("PROPFIND", "/d/").header("Depth", "0").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let body = resp_to_string(resp).await;
    assert_eq!(count_matches(&body, "<D:response>"), 1);

    // depth 1: collection plus direct children.
    let resp = server
        .handle(req("PROPFIND", "/d/").header("Depth", "1").body(Body::empty()).unwrap())
        .await;
    let body = resp_to_string(resp).await;
    assert_eq!(count_matches(&body, "<D:response>"), 3);

    // depth infinity, empty body: the whole subtree.
    let resp = server
        .handle(
            req("PROPFIND", "/d/")
                .header("Depth", "infinity")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let body = resp_to_string(resp).await;
    assert_eq!(count_matches(&body, "<D:response>"), 3);
    assert!(body.contains("<D:href>/d/</D:href>"));
    assert!(body.contains("<D:href>/d/a.txt</D:href>"));
    assert!(body.contains("<D:href>/d/b.txt</D:href>"));
}

#[tokio::test]
async fn propfind_live_properties() {
    let (_, server) = setup().await;

    let body = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:">
          <D:prop><D:getetag/><D:getcontentlength/><D:resourcetype/><D:getcontenttype/></D:prop>
        </D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/a.txt")
                .header("Depth", "0")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:getetag>"));
    assert!(text.contains("<D:getcontentlength>15</D:getcontentlength>"));
    assert!(text.contains("text/plain"));
    assert!(text.contains("HTTP/1.1 200 OK"));

    // a collection reports D:collection in resourcetype.
    let body = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/d/")
                .header("Depth", "0")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:collection"));
}

#[tokio::test]
async fn propfind_unknown_property_is_404() {
    let (_, server) = setup().await;
    let body = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:" xmlns:Z="urn:z">
          <D:prop><Z:nosuch/></D:prop>
        </D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/a.txt")
                .header("Depth", "0")
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 404"));
    assert!(text.contains("nosuch"));
}

#[tokio::test]
async fn propfind_bad_xml_is_400() {
    let (_, server) = setup().await;
    let resp = server
        .handle(req("PROPFIND", "/a.txt").body(Body::from("<not-even-xml")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn propfind_missing_resource_is_404() {
    let (_, server) = setup().await;
    let resp = server
        .handle(req("PROPFIND", "/nope.txt").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proppatch_roundtrip() {
    let (_, server) = setup().await;

    let update = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:E="urn:example">
          <D:set><D:prop><E:color>blue</E:color></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = server
        .handle(req("PROPPATCH", "/a.txt").body(Body::from(update)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 200 OK"));
    assert!(text.contains("color"));

    // reading it back yields the exact value.
    let read = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:" xmlns:E="urn:example">
          <D:prop><E:color/></D:prop>
        </D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/a.txt")
                .header("Depth", "0")
                .body(Body::from(read))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains(">blue<"));

    // and removal is effective (and idempotent).
    let remove = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:E="urn:example">
          <D:remove><D:prop><E:color/></D:prop></D:remove>
        </D:propertyupdate>"#;
    for _ in 0..2 {
        let resp = server
            .handle(req("PROPPATCH", "/a.txt").body(Body::from(remove)).unwrap())
            .await;
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let text = resp_to_string(resp).await;
        assert!(text.contains("HTTP/1.1 200 OK"));
    }
    let resp = server
        .handle(
            req("PROPFIND", "/a.txt")
                .header("Depth", "0")
                .body(Body::from(read))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 404"));
}

#[tokio::test]
async fn proppatch_protects_dav_namespace() {
    let (_, server) = setup().await;

    // one DAV: write poisons the batch: it reports 403, everything
    // else 424, and nothing is applied.
    let update = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:E="urn:example">
          <D:set><D:prop><D:displayname>new name</D:displayname></D:prop></D:set>
          <D:set><D:prop><E:color>red</E:color></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = server
        .handle(req("PROPPATCH", "/a.txt").body(Body::from(update)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 403"));
    assert!(text.contains("HTTP/1.1 424"));

    let read = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:" xmlns:E="urn:example">
          <D:prop><E:color/></D:prop>
        </D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/a.txt")
                .header("Depth", "0")
                .body(Body::from(read))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains("HTTP/1.1 404"));
}

#[tokio::test]
async fn copy_overwrite_false_against_existing() {
    let (_, server) = setup().await;
    let resp = server
        .handle(
            req("COPY", "/a.txt")
                .header("Destination", "/b.txt")
                .header("Overwrite", "F")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn copy_carries_dead_properties() {
    let (be, server) = setup().await;

    let update = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:E="urn:example">
          <D:set><D:prop><E:flavour>mint</E:flavour></D:prop></D:set>
        </D:propertyupdate>"#;
    let resp = server
        .handle(req("PROPPATCH", "/a.txt").body(Body::from(update)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);

    let resp = server
        .handle(
            req("COPY", "/a.txt")
                .header("Destination", "/copied.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    use dav_engine::DavBackend;
    let p = dav_engine::DavPath::new("/copied.txt").unwrap();
    assert!(be.exists(&p).await.unwrap());

    let read = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:" xmlns:E="urn:example">
          <D:prop><E:flavour/></D:prop>
        </D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/copied.txt")
                .header("Depth", "0")
                .body(Body::from(read))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains(">mint<"));
}

#[tokio::test]
async fn move_transfers_everything() {
    let (be, server) = setup().await;

    let update = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:E="urn:example">
          <D:set><D:prop><E:tag>keep</E:tag></D:prop></D:set>
        </D:propertyupdate>"#;
    server
        .handle(req("PROPPATCH", "/d/a.txt").body(Body::from(update)).unwrap())
        .await;

    let resp = server
        .handle(
            req("MOVE", "/d/")
                .header("Destination", "/e/")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    use dav_engine::DavBackend;
    assert!(!be.exists(&dav_engine::DavPath::new("/d/").unwrap()).await.unwrap());
    assert!(be.exists(&dav_engine::DavPath::new("/e/").unwrap()).await.unwrap());
    assert!(
        be.exists(&dav_engine::DavPath::new("/e/a.txt").unwrap())
            .await
            .unwrap()
    );

    let read = r#"<?xml version="1.0"?>
        <D:propfind xmlns:D="DAV:" xmlns:E="urn:example">
          <D:prop><E:tag/></D:prop>
        </D:propfind>"#;
    let resp = server
        .handle(
            req("PROPFIND", "/e/a.txt")
                .header("Depth", "0")
                .body(Body::from(read))
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains(">keep<"));
}

#[tokio::test]
async fn if_none_match_star_creation_guard() {
    let (_, server) = setup().await;

    let resp = server
        .handle(
            req("PUT", "/c.txt")
                .header("If-None-Match", "*")
                .body(Body::from("fresh"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = server
        .handle(
            req("PUT", "/c.txt")
                .header("If-None-Match", "*")
                .body(Body::from("again"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn if_match_star_requires_existence() {
    let (_, server) = setup().await;

    let resp = server
        .handle(
            req("PUT", "/nope.txt")
                .header("If-Match", "*")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);

    let resp = server
        .handle(
            req("PUT", "/a.txt")
                .header("If-Match", "*")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn delete_empty_collection() {
    let (be, server) = setup().await;
    be.add_collection("/empty/").await;

    let resp = server
        .handle(req("DELETE", "/empty/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    use dav_engine::DavBackend;
    assert!(
        !be.exists(&dav_engine::DavPath::new("/empty/").unwrap())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn get_and_head_basics() {
    let (_, server) = setup().await;

    let resp = server.handle(req("GET", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("etag").is_some());
    assert!(resp.headers().get("last-modified").is_some());
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain"
    );
    let text = resp_to_string(resp).await;
    assert_eq!(text, "initial content");

    let resp = server.handle(req("HEAD", "/a.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), "15");
    let text = resp_to_string(resp).await;
    assert!(text.is_empty());

    let resp = server.handle(req("GET", "/gone.txt").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_range() {
    let (_, server) = setup().await;
    let resp = server
        .handle(
            req("GET", "/a.txt")
                .header("Range", "bytes=0-6")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 0-6/15"
    );
    let text = resp_to_string(resp).await;
    assert_eq!(text, "initial");
}

#[tokio::test]
async fn get_collection_lists_members() {
    let (_, server) = setup().await;

    // no trailing slash: redirect first.
    let resp = server.handle(req("GET", "/d").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers().get("location").unwrap(), "/d/");

    let resp = server.handle(req("GET", "/d/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let text = resp_to_string(resp).await;
    assert!(text.contains("a.txt"));
    assert!(text.contains("b.txt"));
}

#[tokio::test]
async fn gzip_when_asked_and_large() {
    let (be, server) = setup().await;
    be.add_object("/big.txt", &vec![b'x'; 10000]).await;

    let resp = server
        .handle(
            req("GET", "/big.txt")
                .header("Accept-Encoding", "gzip, deflate")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-encoding").unwrap(), "gzip");
    let clen: usize = resp
        .headers()
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(clen < 10000);

    // small bodies are left alone.
    let resp = server
        .handle(
            req("GET", "/a.txt")
                .header("Accept-Encoding", "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(resp.headers().get("content-encoding").is_none());
}

#[tokio::test]
async fn options_advertises_class_2() {
    let (be, _) = setup().await;
    let server = DavHandler::builder()
        .backend(Box::new(be.clone()))
        .locksystem(LockManager::new())
        .build_handler();

    let resp = server.handle(req("OPTIONS", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("dav").unwrap(), "1,2");
    assert_eq!(resp.headers().get("ms-author-via").unwrap(), "DAV");
    let allow = resp.headers().get("allow").unwrap().to_str().unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("LOCK"));

    // without a lock table: class 1, no LOCK in Allow.
    let server = DavHandler::builder()
        .backend(Box::new(be))
        .build_handler();
    let resp = server.handle(req("OPTIONS", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.headers().get("dav").unwrap(), "1");
    let allow = resp.headers().get("allow").unwrap().to_str().unwrap();
    assert!(!allow.contains("LOCK"));
}

#[tokio::test]
async fn post_and_trace_are_refused() {
    let (_, server) = setup().await;
    for method in ["POST", "TRACE"] {
        let resp = server.handle(req(method, "/a.txt").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

#[tokio::test]
async fn mkcol_status_codes() {
    let (_, server) = setup().await;

    let resp = server.handle(req("MKCOL", "/newdir/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // already mapped.
    let resp = server.handle(req("MKCOL", "/newdir/").body(Body::empty()).unwrap()).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    // missing intermediate collection.
    let resp = server
        .handle(req("MKCOL", "/no/such/parent/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // a body is not acceptable.
    let resp = server
        .handle(req("MKCOL", "/otherdir/").body(Body::from("junk")).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn delete_with_fragment_is_404() {
    let (_, server) = setup().await;
    let resp = server
        .handle(req("DELETE", "/a%23b.txt").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn report_defaults_to_depth_zero() {
    let (_, server) = setup().await;
    let body = r#"<?xml version="1.0"?>
        <D:some-report xmlns:D="DAV:">
          <D:prop><D:getetag/></D:prop>
        </D:some-report>"#;
    let resp = server
        .handle(req("REPORT", "/d/").body(Body::from(body)).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert_eq!(count_matches(&text, "<D:response>"), 1);
    assert!(text.contains("<D:getetag>"));
}

#[tokio::test]
async fn ms_agent_gets_typed_dates() {
    let (_, server) = setup().await;
    let resp = server
        .handle(
            req("PROPFIND", "/a.txt")
                .header("Depth", "0")
                .header(
                    "User-Agent",
                    "Microsoft Data Access Internet Publishing Provider DAV 1.1",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let text = resp_to_string(resp).await;
    assert!(text.contains(r#"b:dt="dateTime.rfc1123""#));
    assert!(text.contains(r#"b:dt="dateTime.tz""#));
}

#[tokio::test]
async fn prefix_is_stripped_and_restored() {
    let be = MemBackend::with_mimecheck(true);
    be.add_object("/a.txt", b"hi").await;
    let server = DavHandler::builder()
        .backend(Box::new(be))
        .strip_prefix("/dav")
        .build_handler();

    let resp = server
        .handle(
            req("PROPFIND", "/dav/a.txt")
                .header("Depth", "0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
    let text = resp_to_string(resp).await;
    assert!(text.contains("<D:href>/dav/a.txt</D:href>"));

    // outside the prefix there is nothing to see.
    let resp = server
        .handle(req("PROPFIND", "/elsewhere").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}
