use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Log debug output
    #[clap(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the recommendation daemon
    Serve {
        /// Listen address, overrides server.listen_addr
        #[clap(long)]
        addr: Option<String>,
    },

    /// Recommend memes for a text and/or image query
    Recommend {
        /// Query text
        #[clap(short, long)]
        text: Option<String>,

        /// Query image, a local path or http(s) url
        #[clap(short, long)]
        image: Option<String>,

        /// Number of results, capped by recommend.max_results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Weight of the text modality [0.0, 1.0]
        #[clap(short, long)]
        weight_text: Option<f32>,

        /// Only consider memes of this category
        #[clap(short, long)]
        category: Option<String>,

        /// User id recorded with the interaction
        #[clap(short, long)]
        user: Option<String>,
    },

    /// List categories
    Categories {
        /// Bypass the cache
        #[clap(short, long, default_value = "false")]
        force: bool,
    },

    /// Pick a random meme from a category
    Browse { category: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommend_args() {
        let args = Args::parse_from([
            "memerec", "recommend", "--text", "monday", "-k", "3", "--weight-text", "0.8",
        ]);

        match args.command {
            Command::Recommend {
                text,
                image,
                top_k,
                weight_text,
                ..
            } => {
                assert_eq!(text.as_deref(), Some("monday"));
                assert!(image.is_none());
                assert_eq!(top_k, Some(3));
                assert_eq!(weight_text, Some(0.8));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_verbose() {
        let args = Args::parse_from(["memerec", "browse", "cats", "-v"]);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Browse { category } if category == "cats"));
    }
}
