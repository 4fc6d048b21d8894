//! gRPC server implementing `usdt.RateService` and `grpc.health.v1.Health`.

use std::pin::Pin;

use tokio::net::TcpListener;
use tokio_stream::Stream;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::error::Result;
use crate::repository::Database;
use crate::service::RateIngestionService;
use crate::source::QuoteSource;
use crate::types::Rate;

#[allow(clippy::pedantic)] // Generated code.
pub mod proto {
    tonic::include_proto!("usdt");

    pub mod health {
        tonic::include_proto!("grpc.health.v1");
    }
}

use proto::health::health_check_response::ServingStatus;
use proto::health::health_server::{Health, HealthServer};
use proto::health::{HealthCheckRequest, HealthCheckResponse};
use proto::rate_service_server::{RateService, RateServiceServer};
use proto::{GetRateFromExchangeRequest, GetRateFromExchangeResponse};

#[tonic::async_trait]
impl<S: QuoteSource, D: Database> RateService for RateIngestionService<S, D> {
    async fn get_rate_from_exchange(
        &self,
        _request: Request<GetRateFromExchangeRequest>,
    ) -> std::result::Result<Response<GetRateFromExchangeResponse>, Status> {
        let rate = self.ingest().await?;
        Ok(Response::new(to_proto(&rate)))
    }
}

#[allow(clippy::cast_possible_truncation)] // proto fields are `float`.
fn to_proto(rate: &Rate) -> GetRateFromExchangeResponse {
    GetRateFromExchangeResponse {
        success: true,
        ask: rate.ask as f32,
        bid: rate.bid as f32,
        ask_amount: rate.ask_amount as f32,
        bid_amount: rate.bid_amount as f32,
        timestamp: rate.timestamp(),
    }
}

/// Reports `SERVING` for every check. `Watch` is not supported.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthService;

type WatchStream = Pin<Box<dyn Stream<Item = std::result::Result<HealthCheckResponse, Status>> + Send>>;

#[tonic::async_trait]
impl Health for HealthService {
    type WatchStream = WatchStream;

    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> std::result::Result<Response<HealthCheckResponse>, Status> {
        Ok(Response::new(HealthCheckResponse {
            status: ServingStatus::Serving as i32,
        }))
    }

    async fn watch(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> std::result::Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("unimplemented"))
    }
}

/// Serve both services on `listener` until `shutdown` is cancelled.
///
/// After cancellation the listener stops accepting and the future resolves
/// once in-flight calls finish.
pub async fn serve<S: QuoteSource, D: Database>(
    listener: TcpListener,
    service: RateIngestionService<S, D>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "gRPC server listening");

    tonic::transport::Server::builder()
        .add_service(RateServiceServer::new(service))
        .add_service(HealthServer::new(HealthService))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await;
        })
        .await?;

    info!("gRPC server stopped");
    Ok(())
}
