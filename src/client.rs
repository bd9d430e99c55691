//! gRPC transport for communicating with graph servers.

use crate::error::{Error, Result};
use crate::proto::{
    graph_service_client::GraphServiceClient, AuthRequest, ExecutionRequest, SignoutRequest,
};
use crate::transport::{AuthReply, Connector, Response, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Opens gRPC channels to graph servers.
#[derive(Debug, Clone, Default)]
pub struct GrpcConnector;

#[async_trait]
impl Connector for GrpcConnector {
    async fn open(
        &self,
        addr: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>> {
        let mut endpoint = Endpoint::from_shared(format!("http://{}", addr))?;
        if let Some(timeout) = timeout {
            endpoint = endpoint.connect_timeout(timeout).timeout(timeout);
        }

        let channel = endpoint.connect().await?;
        Ok(Box::new(GrpcTransport {
            client: Mutex::new(Some(GraphServiceClient::new(channel))),
        }))
    }
}

/// One gRPC channel to one graph server.
pub struct GrpcTransport {
    client: Mutex<Option<GraphServiceClient<Channel>>>,
}

impl GrpcTransport {
    fn client(&self) -> Result<GraphServiceClient<Channel>> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| Error::Transport("Transport is closed".to_string()))
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthReply> {
        let request = AuthRequest {
            username: username.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
        };

        let response = self.client()?.authenticate(request).await?;
        Ok(response.into_inner().into())
    }

    async fn execute(&self, session_id: i64, stmt: &str) -> Result<Response> {
        let request = ExecutionRequest {
            session_id,
            stmt: stmt.as_bytes().to_vec(),
        };

        let response = self.client()?.execute(request).await?;
        Ok(response.into_inner().into())
    }

    async fn signout(&self, session_id: i64) -> Result<()> {
        self.client()?.signout(SignoutRequest { session_id }).await?;
        Ok(())
    }

    async fn close(&self) {
        // Dropping the last clone of the channel shuts down its connection.
        self.client.lock().take();
    }
}
