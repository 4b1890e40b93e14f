// ABOUTME: Integration tests for oEmbed fetching: request headers, redirects and private-target blocking.
// ABOUTME: oEmbed problems must leave the primary extraction successful with no oEmbed data.

use digests_ogie::{fetch_oembed, Client, ErrorCode, ExtractOptions, OEmbedData};
use httpmock::prelude::*;
use pretty_assertions::assert_eq;

const PUBLIC_HOST: &str = "media.ogie-fixture.com";

const PHOTO: &str = r#"{"type":"photo","version":"1.0","url":"https://cdn.example.com/p.jpg","width":800,"height":600,"provider_name":"Pics"}"#;

fn pinned_http(server: &MockServer) -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .resolve(PUBLIC_HOST, *server.address())
        .build()
        .unwrap()
}

fn pinned_client(server: &MockServer) -> Client {
    Client::builder()
        .http_client(pinned_http(server))
        .build()
        .unwrap()
}

fn public_url(server: &MockServer, path: &str) -> String {
    format!("http://{}:{}{}", PUBLIC_HOST, server.port(), path)
}

fn private_url(server: &MockServer, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", server.port(), path)
}

/// Serve a page at /page that advertises `endpoint` as its JSON oEmbed link.
fn serve_page(server: &MockServer, endpoint: &str) {
    let html = format!(
        r#"<html><head><title>Embed me</title>
        <link rel="alternate" type="application/json+oembed" href="{}"></head></html>"#,
        endpoint
    );
    server.mock(|when, then| {
        when.method(GET).path("/page");
        then.status(200).header("content-type", "text/html").body(html);
    });
}

fn wants_oembed() -> ExtractOptions {
    ExtractOptions::new().fetch_oembed(true)
}

#[tokio::test]
async fn fetches_with_oembed_headers_through_public_redirect() {
    let server = MockServer::start();
    serve_page(&server, &public_url(&server, "/oembed"));
    let moved = public_url(&server, "/oembed/v2");
    server.mock(|when, then| {
        when.method(GET).path("/oembed");
        then.status(301).header("location", moved.as_str());
    });
    let endpoint = server.mock(|when, then| {
        when.method(GET)
            .path("/oembed/v2")
            .header("accept", "application/json")
            .header(
                "user-agent",
                concat!("digests-ogie-oembed/", env!("CARGO_PKG_VERSION")),
            );
        then.status(200).header("content-type", "application/json").body(PHOTO);
    });

    let meta = pinned_client(&server)
        .extract(&public_url(&server, "/page"), &wants_oembed())
        .await
        .unwrap();
    assert_eq!(endpoint.hits(), 1);
    match meta.oembed {
        Some(OEmbedData::Photo { url, width, height, common }) => {
            assert_eq!(url, "https://cdn.example.com/p.jpg");
            assert_eq!((width, height), (800, 600));
            assert_eq!(common.provider_name.as_deref(), Some("Pics"));
        }
        other => panic!("expected photo, got {:?}", other),
    }
}

#[tokio::test]
async fn endpoint_redirecting_to_private_address_yields_no_oembed() {
    let server = MockServer::start();
    serve_page(&server, &public_url(&server, "/oembed"));
    let private = private_url(&server, "/metadata");
    server.mock(|when, then| {
        when.method(GET).path("/oembed");
        then.status(302).header("location", private.as_str());
    });
    let internal = server.mock(|when, then| {
        when.method(GET).path("/metadata");
        then.status(200).body(PHOTO);
    });

    let meta = pinned_client(&server)
        .extract(&public_url(&server, "/page"), &wants_oembed())
        .await
        .unwrap();
    assert_eq!(meta.basic.title.as_deref(), Some("Embed me"));
    assert_eq!(meta.oembed, None);
    assert_eq!(internal.hits(), 0);
}

#[tokio::test]
async fn private_hop_in_multi_hop_chain_stops_oembed() {
    let server = MockServer::start();
    serve_page(&server, &public_url(&server, "/oembed"));
    let second = public_url(&server, "/oembed/next");
    let private = private_url(&server, "/admin");
    server.mock(|when, then| {
        when.method(GET).path("/oembed");
        then.status(302).header("location", second.as_str());
    });
    let next = server.mock(|when, then| {
        when.method(GET).path("/oembed/next");
        then.status(302).header("location", private.as_str());
    });
    let admin = server.mock(|when, then| {
        when.method(GET).path("/admin");
        then.status(302).header("location", "/final");
    });

    let meta = pinned_client(&server)
        .extract(&public_url(&server, "/page"), &wants_oembed())
        .await
        .unwrap();
    assert_eq!(meta.oembed, None);
    assert_eq!(next.hits(), 1);
    assert_eq!(admin.hits(), 0);
}

#[tokio::test]
async fn directly_private_endpoint_is_never_requested() {
    let server = MockServer::start();
    serve_page(&server, &private_url(&server, "/oembed"));
    let endpoint = server.mock(|when, then| {
        when.method(GET).path("/oembed");
        then.status(200).body(PHOTO);
    });

    let meta = pinned_client(&server)
        .extract(&public_url(&server, "/page"), &wants_oembed())
        .await
        .unwrap();
    assert_eq!(meta.oembed, None);
    assert_eq!(endpoint.hits(), 0);
}

#[tokio::test]
async fn fetch_oembed_reports_oembed_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/incomplete");
        then.status(200).body(r#"{"type":"video","version":"1.0"}"#);
    });

    let http = pinned_http(&server);
    let opts = ExtractOptions::new();

    let err = fetch_oembed(&http, &public_url(&server, "/missing"), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OEmbedError);
    assert_eq!(err.message(), "oEmbed fetch failed with status 404");

    let err = fetch_oembed(&http, &public_url(&server, "/incomplete"), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OEmbedError);
    assert_eq!(err.message(), "Failed to parse oEmbed response");

    let err = fetch_oembed(&http, &private_url(&server, "/missing"), &opts)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OEmbedError);
}
