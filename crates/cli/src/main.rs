use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use lab_core::{
    config::{clinic_name_from_env_value, database_url_from_env_value, max_connections_from_env_value},
    BillingPeriod, BillingPeriodQuery, BillingService, CoreConfig, Database, ExamService,
    OrderService, PatientService, PeriodKind, QueueService,
};

#[derive(Parser)]
#[command(name = "lab")]
#[command(about = "Clinical laboratory backend CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PeriodArg {
    TodayPaid,
    ThisWeek,
    ThisMonth,
    Day,
    Range,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and apply migrations
    Migrate,
    /// List active patients
    List,
    /// List active staff members
    Staff,
    /// List active exam templates
    Templates,
    /// Show the arrival queue of a day
    Queue {
        /// Day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List orders registered on a day
    Orders {
        /// Day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Billing total over a period
    Billing {
        #[arg(value_enum)]
        period: PeriodArg,
        /// Day for `day`
        #[arg(long)]
        date: Option<NaiveDate>,
        /// First day for `range`
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day for `range`
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

impl From<PeriodArg> for PeriodKind {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::TodayPaid => PeriodKind::TodayPaid,
            PeriodArg::ThisWeek => PeriodKind::ThisWeek,
            PeriodArg::ThisMonth => PeriodKind::ThisMonth,
            PeriodArg::Day => PeriodKind::Day,
            PeriodArg::Range => PeriodKind::Range,
        }
    }
}

fn config_from_env() -> Result<CoreConfig, Box<dyn std::error::Error>> {
    let cfg = CoreConfig::new(
        database_url_from_env_value(std::env::var("DATABASE_URL").ok()),
        max_connections_from_env_value(std::env::var("LAB_DB_MAX_CONNECTIONS").ok())?,
        clinic_name_from_env_value(std::env::var("LAB_CLINIC_NAME").ok())?,
    )?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("No command given. Use --help to list commands.");
        return Ok(());
    };

    let cfg = config_from_env()?;
    let db = Database::connect(&cfg).await?;
    let today = Utc::now().date_naive();

    match command {
        Commands::Migrate => {
            println!("Database at {} is up to date.", cfg.database_url());
        }
        Commands::List => {
            let patients = PatientService::new(db.clone()).list_patients().await?;
            if patients.is_empty() {
                println!("No patients found.");
            } else {
                for patient in patients {
                    println!(
                        "ID: {}, Name: {}, CPF: {}, Phone: {}",
                        patient.id, patient.name, patient.cpf, patient.phone
                    );
                }
            }
        }
        Commands::Staff => {
            let staff = PatientService::new(db.clone()).list_staff().await?;
            if staff.is_empty() {
                println!("No staff found.");
            }
            for member in staff {
                println!(
                    "ID: {}, Name: {}, Doctor: {}, Admin: {}",
                    member.id, member.name, member.is_doctor, member.is_admin
                );
            }
        }
        Commands::Templates => {
            let templates = ExamService::new(db.clone()).list_templates().await?;
            if templates.is_empty() {
                println!("No exam templates found.");
            }
            for exam in templates {
                println!(
                    "ID: {}, Code: {}, Name: {}, Material: {}",
                    exam.id, exam.code, exam.name, exam.material
                );
            }
        }
        Commands::Queue { date } => {
            let date = date.unwrap_or(today);
            let queue = QueueService::new(db.clone());
            let entries = queue.list_for_date(date).await?;
            for entry in &entries {
                println!(
                    "{} patient {} {}",
                    entry.sequence, entry.patient_id, entry.status
                );
            }
            let counts = queue.day_counts(date).await?;
            println!(
                "{}: {} waiting, {} served, {} total",
                date.format("%d/%m/%Y"),
                counts.waiting,
                counts.served,
                counts.total
            );
        }
        Commands::Orders { date } => {
            let orders = OrderService::new(db.clone())
                .list_for_date(date.unwrap_or(today))
                .await?;
            if orders.is_empty() {
                println!("No orders found.");
            }
            for order in orders {
                println!(
                    "Order {}: patient {}, total R$ {}, {} / {}",
                    order.id, order.patient_id, order.total, order.payment_method, order.payment_status
                );
            }
        }
        Commands::Billing {
            period,
            date,
            start,
            end,
        } => {
            let period = BillingPeriod::try_from(BillingPeriodQuery {
                period: period.into(),
                date,
                start,
                end,
            })?;
            let summary = BillingService::new(db.clone()).summary(period, today).await?;
            for order in &summary.orders {
                println!(
                    "{} order {}: R$ {}",
                    order.registered_on.format("%d/%m/%Y"),
                    order.id,
                    order.total
                );
            }
            println!("Total: R$ {} over {} orders", summary.total, summary.orders.len());
        }
    }

    db.close().await;
    Ok(())
}
