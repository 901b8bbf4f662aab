// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for MongoDB.
//!
//! Change streams and transactions both need a replica set, so every container
//! here is started as a single-member replica set and initiated before use.

use mongodb::bson::doc;
use mongodb::Client;
use std::time::Duration;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage, RunnableImage};

/// Start a single-node MongoDB replica set (`rs0`).
///
/// Uses the official mongo:7 image. Waits for "Waiting for connections";
/// call [`initiate_replica_set`] before using it.
pub fn mongo_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("mongo", "7.0")
        .with_exposed_port(27017)
        .with_wait_for(WaitFor::message_on_stdout("Waiting for connections"));
    let args = vec![
        "--replSet".to_string(),
        "rs0".to_string(),
        "--bind_ip_all".to_string(),
    ];
    docker.run(RunnableImage::from((image, args)))
}

/// Connection string for a container, talking straight to the one member.
pub fn mongo_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(27017);
    format!("mongodb://127.0.0.1:{}/?directConnection=true", port)
}

/// Initiate the replica set and wait until the member is primary.
pub async fn initiate_replica_set(url: &str) -> mongodb::error::Result<Client> {
    let client = Client::with_uri_str(url).await?;
    let admin = client.database("admin");

    admin
        .run_command(doc! {
            "replSetInitiate": {
                "_id": "rs0",
                "members": [{ "_id": 0, "host": "localhost:27017" }],
            }
        })
        .await?;

    for _ in 0..60 {
        let hello = admin.run_command(doc! { "hello": 1 }).await?;
        if hello.get_bool("isWritablePrimary").unwrap_or(false) {
            return Ok(client);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("replica set never elected a primary");
}

/// A started, initiated MongoDB replica set.
pub struct TestCluster<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub url: String,
    pub client: Client,
}

impl<'a> TestCluster<'a> {
    pub async fn start(docker: &'a Cli) -> TestCluster<'a> {
        let container = mongo_container(docker);
        let url = mongo_url(&container);
        let client = initiate_replica_set(&url)
            .await
            .expect("failed to initiate replica set");
        Self { container, url, client }
    }
}
