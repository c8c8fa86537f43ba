//! # OJP CLI
//!
//! Interactive SQL client. Picks a server endpoint through the same
//! multinode coordination logic a real driver would use (`spec.md` §4.7),
//! then drives the JSON API an `ojp-server` process exposes.

use std::io::Write;
use std::time::Duration;

use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use ojp_core::client::{ConnectionManager, ConnectionManagerConfig, ServerEndpoint};
use ojp_core::common::ClientUuid;
use ojp_core::service::wire::{ConnectionDetails, OpResult, SessionInfo, StatementRequest};
use ojp_core::VERSION;

fn looks_like_query(sql: &str) -> bool {
    sql.trim_start().get(..6).map(|s| s.eq_ignore_ascii_case("select")).unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("OJP CLI v{VERSION}");

    let endpoints: Vec<ServerEndpoint> = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8089".to_string())
        .split(',')
        .map(|s| ServerEndpoint(s.trim().to_string()))
        .collect();

    let manager = ConnectionManager::new(
        endpoints,
        ConnectionManagerConfig {
            health_check_threshold: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(2),
            loadaware_selection_enabled: true,
            connection_unified_enabled: true,
        },
    );

    let endpoint = manager.select_xa_endpoint().ok_or("no server endpoints configured")?;
    println!("Connecting to {}...", endpoint.0);

    let http = reqwest::Client::new();
    let details = ConnectionDetails {
        url: "jdbc:ojp:passthrough".to_string(),
        user: std::env::var("OJP_USER").unwrap_or_else(|_| "scott".to_string()),
        password: std::env::var("OJP_PASSWORD").unwrap_or_default(),
        is_xa: false,
        server_endpoints: vec![endpoint.0.clone()],
        cluster_health: format!("{}=UP", endpoint.0),
        properties: Default::default(),
    };

    let session: SessionInfo = http
        .post(format!("{}/connect", endpoint.0))
        .json(&serde_json::json!({ "details": details, "client_uuid": ClientUuid::new("ojp-cli") }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    manager.bind_session(session.session_uuid.clone(), endpoint.clone());
    println!("Connected. Session {}.", session.session_uuid);
    println!("Type SQL or 'exit' to quit.");

    let mut reader = BufReader::new(stdin());
    let mut input = String::new();

    loop {
        print!("ojp> ");
        std::io::stdout().flush().ok();

        input.clear();
        if reader.read_line(&mut input).await? == 0 {
            break;
        }
        let sql = input.trim();
        if sql.is_empty() {
            continue;
        }
        if sql.eq_ignore_ascii_case("exit") || sql.eq_ignore_ascii_case("quit") {
            break;
        }

        let request = StatementRequest {
            session: session.clone(),
            sql: sql.to_string(),
            params: vec![],
        };

        let route = if looks_like_query(sql) { "statements/query" } else { "statements/update" };
        let response = http.post(format!("{}/{}", endpoint.0, route)).json(&request).send().await?;

        if !response.status().is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            println!("ERROR: {body}");
            continue;
        }

        if route == "statements/query" {
            let blocks: Vec<OpResult> = response.json().await?;
            print_blocks(&blocks);
        } else {
            let result: OpResult = response.json().await?;
            if let OpResult::UpdateCount(count) = result {
                println!("{count} row(s) affected");
            }
        }
    }

    http.post(format!("{}/sessions/{}/terminate", endpoint.0, session.session_uuid))
        .send()
        .await
        .ok();
    manager.unbind_session(&session.session_uuid);
    println!("Goodbye!");
    Ok(())
}

fn print_blocks(blocks: &[OpResult]) {
    for block in blocks {
        let OpResult::RowBlock(block) = block else { continue };
        if let Some(columns) = &block.columns {
            for col in columns {
                print!("{:20}", col.name);
            }
            println!();
        }
        for row in &block.rows {
            for cell in row {
                let rendered: String = format!("{cell:?}").chars().take(20).collect();
                print!("{rendered:20}");
            }
            println!();
        }
    }
}
