use clap::Parser;
use translate_tokens::{transport::HttpTransport, TokenProvider};

#[derive(Debug, Parser)]
struct Opts {
    /// The subscription key presented to the token issuance endpoint
    #[arg(short = 'k', long, env, hide_env_values = true)]
    subscription_key: String,

    /// The region hosting the subscription; leave empty for the global endpoint
    #[arg(short, long, env, default_value = "")]
    region: String,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let provider = TokenProvider::new(HttpTransport::with_default_client()?);
    provider.set_subscription_key(opts.subscription_key).await;
    provider.set_region(opts.region).await;

    let token = provider.get_access_token().await?;
    tracing::info!(
        token = format_args!("{:#?}", token),
        "fetched access token"
    );

    let again = provider.get_access_token().await?;
    tracing::info!(
        cache_hit = (again == token),
        "second request served without a network call"
    );

    Ok(())
}
