use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "wp-agent")]
#[command(author, version, about = "Relay WordPress diagnostics and chat messages to an LLM", long_about = None)]
pub struct Cli {
    /// Address to bind (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,
}
