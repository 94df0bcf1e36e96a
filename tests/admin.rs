//! Bootstrap, connection admin and blob endpoints of the gateway.

mod common;

use common::*;
use reqwest::StatusCode;
use wormhole::protocol::WormholeBootstrap;
use wormhole::registry::ConnectionEntry;

#[tokio::test]
async fn bootstrap_describes_the_requested_host() {
    let gateway = start_gateway(test_config(addr(28401))).await;

    let res = reqwest::get(gateway.url("/wormholeConfig")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bootstrap: WormholeBootstrap = res.json().await.unwrap();

    assert_eq!(bootstrap.host, gateway.host());
    assert_eq!(
        bootstrap.ws_endpoint,
        format!("ws://{}/wormholeWs", gateway.addr)
    );
    assert_eq!(
        bootstrap.bucket,
        format!("http://{}/wormholeBlobs", gateway.addr)
    );
}

#[tokio::test]
async fn forwarded_https_switches_bootstrap_schemes() {
    let gateway = start_gateway(test_config(addr(28402))).await;

    let bootstrap: WormholeBootstrap = reqwest::Client::new()
        .get(gateway.url("/wormholeConfig"))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(bootstrap.ws_endpoint.starts_with("wss://"));
    assert!(bootstrap.bucket.starts_with("https://"));
}

#[tokio::test]
async fn admin_endpoints_require_the_bearer_secret() {
    let gateway = start_gateway(test_config(addr(28403))).await;
    let client = reqwest::Client::new();

    let res = client.get(gateway.url("/wormholeConnections")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/wormholeConnections"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .put(gateway.url("/wormholeBlobs/abc"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn connections_list_and_force_disconnect() {
    start_local_app(addr(28414)).await;
    let gateway = start_gateway(test_config(addr(28404))).await;
    let client = start_client(&gateway, 28414, false);
    let id = gateway.wait_for_client().await;
    let http = reqwest::Client::new();

    let listed: Vec<ConnectionEntry> = http
        .get(gateway.url("/wormholeConnections"))
        .query(&[("host", gateway.host())])
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].connection_id, id);

    let res = http
        .delete(gateway.url(&format!("/wormholeConnections/{}", id)))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());

    let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), client.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, wormhole::client::ListenOutcome::Displaced);

    let res = http
        .delete(gateway.url(&format!("/wormholeConnections/{}", id)))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blobs_can_be_stored_and_fetched() {
    let gateway = start_gateway(test_config(addr(28405))).await;
    let http = reqwest::Client::new();
    let url = gateway.url("/wormholeBlobs/responses/r1");

    let res = http
        .put(&url)
        .bearer_auth(SECRET)
        .header("content-type", "text/csv")
        .body("a,b\n1,2\n")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(gateway.blobs.put_count(), 1);

    let res = http.head(&url).bearer_auth(SECRET).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = http.get(&url).bearer_auth(SECRET).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("content-type").unwrap(), "text/csv");
    assert_eq!(res.text().await.unwrap(), "a,b\n1,2\n");

    let res = http
        .get(gateway.url("/wormholeBlobs/missing"))
        .bearer_auth(SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
