use hubwire::prelude::*;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// `Echo(text)` answers the caller; `Shout(text)` sends `Receive(text)` to
/// every connected client.
struct EchoHub {
    methods: MethodTable,
    clients: HubConnectionStore,
}

impl EchoHub {
    fn new(clients: HubConnectionStore) -> Self {
        Self {
            methods: MethodTable::new()
                .with_method("Echo", vec![ParameterType::String])
                .with_method("Shout", vec![ParameterType::String]),
            clients,
        }
    }
}

impl InvocationBinder for EchoHub {
    fn parameter_types(&self, target: &str) -> Option<&[ParameterType]> {
        self.methods.parameter_types(target)
    }
}

impl HubDispatcher for EchoHub {
    async fn on_connected(&self, connection: &HubConnection) {
        tracing::info!(connection_id = %connection.id(), "client joined");
    }

    async fn dispatch(
        &self,
        connection: &HubConnection,
        message: HubMessage,
    ) -> Result<(), HubwireError> {
        let HubMessage::Invocation(invocation) = message else {
            return Ok(());
        };
        let text = match invocation.arguments() {
            Ok([text]) => text.clone(),
            _ => Value::Null,
        };

        match invocation.target() {
            "Echo" => {
                if let Some(id) = invocation.invocation_id() {
                    let reply = CompletionMessage::with_result(id, text);
                    connection.send(&HubMessage::Completion(reply)).await?;
                }
            }
            "Shout" => {
                let event = InvocationMessage::new(None, "Receive", vec![text]);
                let delivered = self.clients.broadcast(HubMessage::Invocation(event)).await;
                if let Some(id) = invocation.invocation_id() {
                    let reply = CompletionMessage::with_result(id, delivered.into());
                    connection.send(&HubMessage::Completion(reply)).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_disconnected(&self, connection: &HubConnection) {
        tracing::info!(connection_id = %connection.id(), "client left");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Reads options from the JSON file named by the first argument, if any.
fn load_options() -> Result<HttpConnectionOptions, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(HttpConnectionOptions::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hubwire=debug".into()),
        )
        .init();

    let options = load_options()?;
    let builder = HubwireServerBuilder::new()
        .bind("0.0.0.0:8080")
        .options(options);
    let clients = builder.store();
    let server = builder.build(EchoHub::new(clients)).await?;

    tracing::info!(addr = %server.local_addr()?, "echo server listening");
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
