use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use structopt::StructOpt;

use canteen::diner::Diner;
use canteen::menus::{ActivateMenu, ListMenus, MealItem, Menu, MenuDraft, ScheduleMenu, ShowMenu};
use canteen::orders::BookMeal;
use canteen::sales::{PaymentType, RecordOfflineSale};
use canteen::services::{Commandable, Queryable};
use infra::ids::Id;

#[derive(Debug, StructOpt)]
#[structopt(name = "canteen", about = "Run the cafeteria from the counter.")]
struct Opt {
    /// Config file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    #[structopt(subcommand)]
    command: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "setup", about = "Initialize the store")]
    Setup,
    #[structopt(name = "show-menu", about = "Everything currently orderable")]
    ShowMenu,
    #[structopt(name = "list-menus", about = "All menus, oldest first")]
    ListMenus,
    #[structopt(name = "schedule", about = "Schedule a menu from items given as name:price:quantity")]
    Schedule(Schedule),
    #[structopt(name = "activate", about = "Open a scheduled menu for ordering")]
    Activate {
        menu_id: Id<Menu>,
    },
    #[structopt(name = "book", about = "Book one serving and print the token")]
    Book {
        menu_id: Id<Menu>,
        meal: String,
        diner_id: Id<Diner>,
    },
    #[structopt(name = "new-diner", about = "Mint an ordering identity")]
    NewDiner,
    #[structopt(name = "offline-sale", about = "Record a counter sale")]
    OfflineSale {
        meal: String,
        quantity: u32,
        amount: Decimal,
        payment: PaymentType,
    },
}

#[derive(Debug, StructOpt)]
struct Schedule {
    #[structopt(short = "d", long = "date")]
    date: NaiveDate,
    /// Launch time, eg 12:30
    #[structopt(short = "t", long = "time")]
    time: String,
    /// Items as name:price:quantity
    #[structopt(short = "i", long = "item")]
    items: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    canteen: canteen::config::Config,
    env_logger: canteen::config::EnvLogger,
}

fn parse_time(src: &str) -> Result<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(src, "%H:%M:%S")
        .or_else(|_| chrono::NaiveTime::parse_from_str(src, "%H:%M"))
        .map_err(|e| anyhow::anyhow!("unparseable launch time {:?}: {}", src, e))
}

fn parse_item(src: &str) -> Result<MealItem> {
    let mut parts = src.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(price), Some(quantity)) => Ok(MealItem {
            name: name.to_string(),
            price: price.parse()?,
            description: None,
            quantity: quantity.parse()?,
        }),
        _ => Err(anyhow::anyhow!(
            "item {:?} should look like name:price:quantity",
            src
        )),
    }
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut config_buf = String::new();
    File::open(&opt.config)?.read_to_string(&mut config_buf)?;
    let config: Config = toml::from_str(&config_buf)?;

    config.env_logger.builder().init();

    let canteen = canteen::Canteen::new(&config.canteen)?;

    match opt.command {
        Commands::Setup => {
            canteen.setup()?;
        }
        Commands::ShowMenu => {
            for (menu_id, item) in canteen.menus()?.query(ShowMenu)? {
                println!(
                    "{}\t{}\t{}\t{} left",
                    menu_id, item.name, item.price, item.quantity
                );
            }
        }
        Commands::ListMenus => {
            for menu in canteen.menus()?.query(ListMenus)? {
                println!(
                    "{}\t{}\t{:?}\t{} items",
                    menu.id(),
                    menu.date,
                    menu.status,
                    menu.items.len()
                );
            }
        }
        Commands::Schedule(schedule) => {
            let mut draft = MenuDraft::new();
            draft.date = Some(schedule.date);
            draft.launch_time = Some(parse_time(&schedule.time)?);
            for src in &schedule.items {
                let item = parse_item(src)?;
                if !draft.add_item(item) {
                    eprintln!("rejected item: {}", src);
                }
            }
            let id = canteen.menus()?.execute(ScheduleMenu { draft })?;
            println!("{}", id);
        }
        Commands::Activate { menu_id } => {
            canteen.menus()?.execute(ActivateMenu { menu_id })?;
        }
        Commands::Book {
            menu_id,
            meal,
            diner_id,
        } => {
            let issued = canteen.bookings()?.execute(BookMeal {
                menu_id,
                meal_name: meal,
                diner_id: Some(diner_id),
            })?;
            println!("{}", issued.token);
        }
        Commands::NewDiner => {
            let diner = canteen.enroll_diner()?;
            println!("{}", diner.id());
        }
        Commands::OfflineSale {
            meal,
            quantity,
            amount,
            payment,
        } => {
            canteen.sales()?.execute(RecordOfflineSale {
                meal_name: meal,
                quantity,
                amount,
                payment_type: payment,
            })?;
        }
    }

    Ok(())
}
