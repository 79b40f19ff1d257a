use anyhow::Result;
use booking::{accounts, catalog, ApiContext};
use clap::{Parser, Subcommand};
use shared::{
    domain::MovieId,
    protocol::{HallRequest, MovieRequest, ScreeningRequest},
};
use storage::Storage;

/// Seeds and inspects a cinema database without going through HTTP.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/cinema.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
        password: String,
    },
    CreateHall {
        name: String,
        #[arg(long, value_delimiter = ',')]
        rows: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        cols: Vec<i32>,
    },
    CreateMovie {
        title: String,
        #[arg(long, default_value_t = 0)]
        duration: i32,
        #[arg(long, default_value = "")]
        genre: String,
    },
    /// Schedules a movie; DATE is YYYY-MM-DD.
    CreateScreening {
        movie_id: i64,
        date: String,
        time: String,
        hall: String,
        tickets: i64,
    },
    ListReservations {
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = ApiContext::new(Storage::new(&cli.database_url).await?);

    match cli.command {
        Command::CreateUser { username, password } => {
            let user = accounts::register_user(&ctx, &username, &password).await?;
            println!("created user_id={} username={}", user.id, user.username);
        }
        Command::CreateHall { name, rows, cols } => {
            let hall = catalog::create_hall(&ctx, &HallRequest { name, rows, cols }).await?;
            println!("created hall_id={}", hall.id);
        }
        Command::CreateMovie {
            title,
            duration,
            genre,
        } => {
            let movie = catalog::create_movie(
                &ctx,
                &MovieRequest {
                    title,
                    duration,
                    genre,
                    directors: String::new(),
                    actors: String::new(),
                    screening: None,
                    plot: String::new(),
                    poster: String::new(),
                },
            )
            .await?;
            println!("created movie_id={}", movie.id);
        }
        Command::CreateScreening {
            movie_id,
            date,
            time,
            hall,
            tickets,
        } => {
            let screening = catalog::create_screening(
                &ctx,
                &ScreeningRequest {
                    movie_id: MovieId(movie_id),
                    date,
                    time,
                    hall,
                    num_of_tickets: tickets,
                },
            )
            .await?;
            println!("created screening_id={}", screening.id);
        }
        Command::ListReservations { username } => {
            let reservations = booking::list_reservations_for_user(&ctx, &username).await?;
            println!("{}", serde_json::to_string_pretty(&reservations)?);
        }
    }

    Ok(())
}
