//! Guarded with `#[cfg(test)]` from `lib.rs`

use std::collections::HashSet;
use std::thread;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use maplit::{hashmap, hashset};
use rust_decimal::Decimal;

use infra::persistence::{DocumentConnectionManager, Storage};

use crate::admin::{Admin, AdminDirectory, RegisterAdmin, VerifyAdmin};
use crate::catalog::{Catalog, CatalogItem, FormMode, ItemForm, ListItems, SubmitItem};
use crate::diner::Diner;
use crate::menus::{
    ActivateMenu, ActiveMenuOn, KnownItems, ListMenus, MealItem, Menu, MenuDraft, MenuStatus,
    Menus, ReuseMenu, ScheduleMenu, ScheduleError, ShowMenu,
};
use crate::orders::{BookMeal, BookingError, Bookings, MealToken, TokensFor};
use crate::sales::{
    ItemTotals, OfflineSale, OfflineSaleError, PaymentType, RecordOfflineSale, SalesLedger,
    SalesRecord, Source, TodaysOnline,
};
use crate::services::{Commandable, Queryable};


use self::junk_drawer::{store, TestStore};

fn menus(store: &TestStore) -> Menus<DocumentConnectionManager> {
    Menus::new(store.pool.clone()).expect("menus service")
}

fn bookings(store: &TestStore) -> Bookings<DocumentConnectionManager> {
    Bookings::new(store.pool.clone()).expect("bookings service")
}

fn ledger(store: &TestStore) -> SalesLedger<DocumentConnectionManager> {
    SalesLedger::new(store.pool.clone()).expect("sales service")
}

fn item(name: &str, price: i64, quantity: u32) -> MealItem {
    MealItem {
        name: name.to_string(),
        price: Decimal::from(price),
        description: None,
        quantity,
    }
}

fn draft(date: NaiveDate, items: &[MealItem]) -> MenuDraft {
    draft_at(date, NaiveTime::from_hms_opt(9, 30, 0).expect("time"), items)
}

fn draft_at(date: NaiveDate, time: NaiveTime, items: &[MealItem]) -> MenuDraft {
    let mut draft = MenuDraft::new();
    draft.date = Some(date);
    draft.launch_time = Some(time);
    for it in items {
        assert!(draft.add_item(it.clone()), "valid item: {:?}", it);
    }
    draft
}

fn a_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 3, 14).expect("date")
}

fn today() -> NaiveDate {
    Utc::now().naive_utc().date()
}

fn enroll(store: &TestStore) -> Diner {
    let mut diner = Diner::incarnate(&infra::ids::IdGen::new());
    store
        .pool
        .get()
        .expect("connection")
        .save(&mut diner)
        .expect("save diner");
    diner
}

/// Schedules and activates a menu of the given items, dated today so the
/// offline picker can see it too. Distinct launch hours keep listing order
/// deterministic when a test runs several menus.
fn live_menu_at(store: &TestStore, hour: u32, items: &[MealItem]) -> infra::ids::Id<Menu> {
    let menus = menus(store);
    let menu_id = menus
        .execute(ScheduleMenu {
            draft: draft_at(
                today(),
                NaiveTime::from_hms_opt(hour, 30, 0).expect("time"),
                items,
            ),
        })
        .expect("schedule");
    menus.execute(ActivateMenu { menu_id }).expect("activate");
    menu_id
}

fn live_menu(store: &TestStore, items: &[MealItem]) -> infra::ids::Id<Menu> {
    live_menu_at(store, 9, items)
}

fn booking_error(err: &anyhow::Error) -> Option<&BookingError> {
    err.root_cause().downcast_ref()
}

#[test]
fn scheduling_persists_exactly_one_menu() -> Result<()> {
    let store = store("scheduling_persists_exactly_one_menu")?;
    let menus = menus(&store);

    let date = a_date();
    menus.execute(ScheduleMenu {
        draft: draft(date, &[item("Idli", 20, 50), item("Vada", 15, 30)]),
    })?;

    let all = menus.query(ListMenus)?;
    assert_eq!(1, all.len());
    let menu = &all[0];
    assert_eq!(MenuStatus::Scheduled, menu.status);
    assert_eq!(date, menu.date);
    assert_eq!(
        Utc.from_utc_datetime(&date.and_time(NaiveTime::from_hms_opt(9, 30, 0).expect("time"))),
        menu.launch_time
    );
    assert_eq!(
        vec![item("Idli", 20, 50), item("Vada", 15, 30)],
        menu.items
    );
    Ok(())
}

#[test]
fn scheduling_requires_items_a_date_and_a_time() -> Result<()> {
    let store = store("scheduling_requires_items_a_date_and_a_time")?;
    let menus = menus(&store);

    let empty = MenuDraft {
        date: Some(a_date()),
        launch_time: NaiveTime::from_hms_opt(9, 30, 0),
        ..MenuDraft::new()
    };
    let err = menus
        .execute(ScheduleMenu { draft: empty })
        .expect_err("empty draft");
    assert_eq!(
        Some(&ScheduleError::EmptyMenu),
        err.root_cause().downcast_ref()
    );

    let mut dateless = draft(a_date(), &[item("Idli", 20, 50)]);
    dateless.date = None;
    let err = menus
        .execute(ScheduleMenu { draft: dateless })
        .expect_err("dateless draft");
    assert_eq!(
        Some(&ScheduleError::MissingDate),
        err.root_cause().downcast_ref()
    );

    let mut timeless = draft(a_date(), &[item("Idli", 20, 50)]);
    timeless.launch_time = None;
    let err = menus
        .execute(ScheduleMenu { draft: timeless })
        .expect_err("timeless draft");
    assert_eq!(
        Some(&ScheduleError::MissingTime),
        err.root_cause().downcast_ref()
    );

    assert!(menus.query(ListMenus)?.is_empty(), "nothing persisted");
    Ok(())
}

#[test]
fn activation_flips_status_and_nothing_else() -> Result<()> {
    let store = store("activation_flips_status_and_nothing_else")?;
    let menus = menus(&store);

    menus.execute(ScheduleMenu {
        draft: draft(a_date(), &[item("Idli", 20, 50)]),
    })?;
    let before = menus.query(ListMenus)?.remove(0);

    menus.execute(ActivateMenu {
        menu_id: before.id(),
    })?;
    let after = menus.query(ListMenus)?.remove(0);

    assert_eq!(MenuStatus::Active, after.status);
    assert_eq!(before.id(), after.id());
    assert_eq!(before.date, after.date);
    assert_eq!(before.launch_time, after.launch_time);
    assert_eq!(before.items, after.items);
    Ok(())
}

#[test]
fn activating_an_unknown_menu_is_an_error() -> Result<()> {
    let store = store("activating_an_unknown_menu_is_an_error")?;
    let menus = menus(&store);

    let missing = infra::ids::IdGen::new().generate::<Menu>();
    let err = menus
        .execute(ActivateMenu { menu_id: missing })
        .expect_err("activate missing");
    assert!(err.to_string().contains("no such menu"), "got: {:?}", err);
    Ok(())
}

#[test]
fn reuse_copies_items_and_date_without_touching_the_source() -> Result<()> {
    let store = store("reuse_copies_items_and_date_without_touching_the_source")?;
    let menus = menus(&store);

    let date = a_date();
    let source_id = menus.execute(ScheduleMenu {
        draft: draft(date, &[item("Idli", 20, 50)]),
    })?;

    let reused = menus.query(ReuseMenu { menu_id: source_id })?;
    assert_eq!(vec![item("Idli", 20, 50)], reused.items);
    assert_eq!(Some(date), reused.date);
    assert_eq!(None, reused.launch_time);

    let source = menus.query(ListMenus)?.remove(0);
    assert_eq!(MenuStatus::Scheduled, source.status);
    assert_eq!(vec![item("Idli", 20, 50)], source.items);
    Ok(())
}

#[test]
fn known_items_keep_the_first_occurrence_of_a_name() -> Result<()> {
    let store = store("known_items_keep_the_first_occurrence_of_a_name")?;
    let menus = menus(&store);

    menus.execute(ScheduleMenu {
        draft: draft(a_date(), &[item("Idli", 20, 50)]),
    })?;
    // Scheduled later, so its Idli price loses the collision.
    let later = draft_at(
        a_date() + chrono::Duration::days(1),
        NaiveTime::from_hms_opt(11, 0, 0).expect("time"),
        &[item("Idli", 25, 10), item("Vada", 15, 30)],
    );
    menus.execute(ScheduleMenu { draft: later })?;

    let known = menus.query(KnownItems)?;
    assert_eq!(vec![item("Idli", 20, 50), item("Vada", 15, 30)], known);
    Ok(())
}

#[test]
fn show_menu_pools_every_active_menu() -> Result<()> {
    let store = store("show_menu_pools_every_active_menu")?;
    let menus = menus(&store);

    let breakfast = live_menu_at(&store, 8, &[item("Idli", 20, 50)]);
    let lunch = live_menu_at(&store, 12, &[item("Thali", 80, 40)]);
    menus.execute(ScheduleMenu {
        draft: draft(a_date(), &[item("Dosa", 30, 20)]),
    })?;

    let orderable = menus.query(ShowMenu)?;
    let names: Vec<_> = orderable
        .iter()
        .map(|(id, item)| (*id, item.name.as_str()))
        .collect();
    assert_eq!(vec![(breakfast, "Idli"), (lunch, "Thali")], names);
    Ok(())
}

#[test]
fn the_offline_picker_finds_todays_active_menu() -> Result<()> {
    let store = store("the_offline_picker_finds_todays_active_menu")?;
    let menus = menus(&store);

    assert_eq!(None, menus.query(ActiveMenuOn { date: today() })?);

    let menu_id = live_menu(&store, &[item("Idli", 20, 50)]);
    let found = menus
        .query(ActiveMenuOn { date: today() })?
        .expect("an active menu today");
    assert_eq!(menu_id, found.id());
    Ok(())
}

#[test]
fn sequential_bookings_issue_contiguous_ascending_tokens() -> Result<()> {
    let store = store("sequential_bookings_issue_contiguous_ascending_tokens")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 50)]);
    let bookings = bookings(&store);

    for expected in 1..=4u32 {
        let diner = enroll(&store);
        let issued = bookings.execute(BookMeal {
            menu_id,
            meal_name: "Idli".to_string(),
            diner_id: Some(diner.id()),
        })?;
        assert_eq!(expected, issued.token_number);
        assert_eq!(format!("TOKEN-{}", expected), issued.token);
    }

    let numbers: Vec<u32> = bookings
        .query(TokensFor {
            menu_id,
            meal_name: "Idli".to_string(),
        })?
        .iter()
        .map(|t| t.token_number)
        .collect();
    assert_eq!(vec![1, 2, 3, 4], numbers);
    Ok(())
}

#[test]
fn booking_idli_twice_spends_the_stock_and_books_the_sales() -> Result<()> {
    let store = store("booking_idli_twice_spends_the_stock_and_books_the_sales")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 2)]);
    let bookings = bookings(&store);
    let menus = menus(&store);

    let first = enroll(&store);
    let second = enroll(&store);

    let issued = bookings.execute(BookMeal {
        menu_id,
        meal_name: "Idli".to_string(),
        diner_id: Some(first.id()),
    })?;
    assert_eq!("TOKEN-1", issued.token);

    let issued = bookings.execute(BookMeal {
        menu_id,
        meal_name: "Idli".to_string(),
        diner_id: Some(second.id()),
    })?;
    assert_eq!("TOKEN-2", issued.token);

    let menu = menus.query(ListMenus)?.remove(0);
    assert_eq!(0, menu.items[0].quantity);

    let sales = ledger(&store).query(TodaysOnline { date: today() })?;
    assert_eq!(2, sales.len());
    for sale in &sales {
        assert_eq!(Decimal::from(20), sale.amount);
        assert_eq!(1, sale.quantity);
        assert_eq!(Source::Online, sale.source);
        assert_eq!(Some(menu_id), sale.menu_id);
    }
    let diners: HashSet<_> = sales.iter().filter_map(|sale| sale.diner_id).collect();
    assert_eq!(hashset! {first.id(), second.id()}, diners);
    Ok(())
}

#[test]
fn booking_without_an_identity_is_refused_with_no_writes() -> Result<()> {
    let store = store("booking_without_an_identity_is_refused_with_no_writes")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 2)]);
    let bookings = bookings(&store);

    let err = bookings
        .execute(BookMeal {
            menu_id,
            meal_name: "Idli".to_string(),
            diner_id: None,
        })
        .expect_err("no identity");
    assert_eq!(Some(&BookingError::NotPermitted), booking_error(&err));

    let docs = store.pool.get()?;
    assert_eq!(2, menus(&store).query(ListMenus)?[0].items[0].quantity);
    assert!(docs.load_all::<MealToken>()?.is_empty());
    assert!(docs.load_all::<SalesRecord>()?.is_empty());
    Ok(())
}

#[test]
fn booking_a_sold_out_meal_leaves_no_trace() -> Result<()> {
    let store = store("booking_a_sold_out_meal_leaves_no_trace")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 0)]);
    let bookings = bookings(&store);
    let diner = enroll(&store);

    let err = bookings
        .execute(BookMeal {
            menu_id,
            meal_name: "Idli".to_string(),
            diner_id: Some(diner.id()),
        })
        .expect_err("sold out");
    assert_eq!(
        Some(&BookingError::SoldOut("Idli".to_string())),
        booking_error(&err)
    );

    let docs = store.pool.get()?;
    assert!(docs.load_all::<MealToken>()?.is_empty());
    assert!(docs.load_all::<SalesRecord>()?.is_empty());
    Ok(())
}

#[test]
fn booking_rejects_unknown_menus_and_meals() -> Result<()> {
    let store = store("booking_rejects_unknown_menus_and_meals")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 2)]);
    let bookings = bookings(&store);
    let diner = enroll(&store);

    let err = bookings
        .execute(BookMeal {
            menu_id,
            meal_name: "Biryani".to_string(),
            diner_id: Some(diner.id()),
        })
        .expect_err("unknown meal");
    assert_eq!(
        Some(&BookingError::UnknownMeal("Biryani".to_string())),
        booking_error(&err)
    );

    let missing = infra::ids::IdGen::new().generate::<Menu>();
    let err = bookings
        .execute(BookMeal {
            menu_id: missing,
            meal_name: "Idli".to_string(),
            diner_id: Some(diner.id()),
        })
        .expect_err("unknown menu");
    assert_eq!(Some(&BookingError::UnknownMenu(missing)), booking_error(&err));
    Ok(())
}

#[test]
fn token_sequences_are_independent_per_meal_and_menu() -> Result<()> {
    let store = store("token_sequences_are_independent_per_meal_and_menu")?;
    let first_menu = live_menu_at(&store, 8, &[item("Idli", 20, 5), item("Vada", 15, 5)]);
    let second_menu = live_menu_at(&store, 12, &[item("Idli", 20, 5)]);
    let bookings = bookings(&store);
    let diner = enroll(&store);

    for (menu_id, meal) in &[
        (first_menu, "Idli"),
        (first_menu, "Vada"),
        (second_menu, "Idli"),
    ] {
        let issued = bookings.execute(BookMeal {
            menu_id: *menu_id,
            meal_name: meal.to_string(),
            diner_id: Some(diner.id()),
        })?;
        assert_eq!("TOKEN-1", issued.token, "for {} on {}", meal, menu_id);
    }
    Ok(())
}

#[test]
fn concurrent_bookings_never_oversell_or_duplicate_tokens() -> Result<()> {
    let store = store("concurrent_bookings_never_oversell_or_duplicate_tokens")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 2)]);
    let bookings = bookings(&store);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let svc = bookings.clone();
            let diner = enroll(&store);
            thread::spawn(move || {
                svc.execute(BookMeal {
                    menu_id,
                    meal_name: "Idli".to_string(),
                    diner_id: Some(diner.id()),
                })
            })
        })
        .collect();

    let mut issued = Vec::new();
    let mut sold_out = 0;
    for handle in handles {
        match handle.join().expect("booking thread") {
            Ok(token) => issued.push(token.token_number),
            Err(e) => {
                assert_eq!(
                    Some(&BookingError::SoldOut("Idli".to_string())),
                    booking_error(&e),
                    "unexpected failure: {:?}",
                    e
                );
                sold_out += 1;
            }
        }
    }

    issued.sort();
    assert_eq!(vec![1, 2], issued, "exactly the stock was sold");
    assert_eq!(2, sold_out);

    let menu = menus(&store).query(ListMenus)?.remove(0);
    assert_eq!(0, menu.items[0].quantity);
    let docs = store.pool.get()?;
    assert_eq!(2, docs.load_all::<SalesRecord>()?.len());
    Ok(())
}

#[test]
fn an_offline_sale_lands_in_both_ledgers() -> Result<()> {
    let store = store("an_offline_sale_lands_in_both_ledgers")?;
    live_menu(&store, &[item("Idli", 20, 50)]);

    ledger(&store).execute(RecordOfflineSale {
        meal_name: "Idli".to_string(),
        quantity: 3,
        amount: Decimal::from(60),
        payment_type: PaymentType::Cash,
    })?;

    let docs = store.pool.get()?;
    let slips = docs.load_all::<OfflineSale>()?;
    assert_eq!(1, slips.len());
    assert_eq!(3, slips[0].quantity);
    assert_eq!(Decimal::from(60), slips[0].amount);
    assert_eq!(PaymentType::Cash, slips[0].payment_type);

    let sales = docs.load_all::<SalesRecord>()?;
    assert_eq!(1, sales.len());
    assert_eq!(Source::Offline, sales[0].source);
    assert_eq!(3, sales[0].quantity);
    assert_eq!(Decimal::from(60), sales[0].amount);
    assert_eq!(Some(PaymentType::Cash), sales[0].payment_type);
    assert_eq!(None, sales[0].menu_id);
    assert_eq!(None, sales[0].diner_id);

    // Offline never shows up with the day's online orders.
    assert!(ledger(&store).query(TodaysOnline { date: today() })?.is_empty());
    Ok(())
}

#[test]
fn offline_sales_validate_before_writing() -> Result<()> {
    let store = store("offline_sales_validate_before_writing")?;
    let ledger = ledger(&store);

    for (req, expected) in vec![
        (
            RecordOfflineSale {
                meal_name: " ".to_string(),
                quantity: 1,
                amount: Decimal::from(20),
                payment_type: PaymentType::Cash,
            },
            OfflineSaleError::MissingMeal,
        ),
        (
            RecordOfflineSale {
                meal_name: "Idli".to_string(),
                quantity: 0,
                amount: Decimal::from(20),
                payment_type: PaymentType::Upi,
            },
            OfflineSaleError::ZeroQuantity,
        ),
        (
            RecordOfflineSale {
                meal_name: "Idli".to_string(),
                quantity: 1,
                amount: Decimal::from(-20),
                payment_type: PaymentType::Card,
            },
            OfflineSaleError::NegativeAmount,
        ),
    ] {
        let err = ledger.execute(req).expect_err("invalid sale");
        assert_eq!(Some(&expected), err.root_cause().downcast_ref());
    }

    let docs = store.pool.get()?;
    assert!(docs.load_all::<OfflineSale>()?.is_empty());
    assert!(docs.load_all::<SalesRecord>()?.is_empty());
    Ok(())
}

#[test]
fn item_totals_sum_the_days_online_quantities() -> Result<()> {
    let store = store("item_totals_sum_the_days_online_quantities")?;
    let menu_id = live_menu(&store, &[item("Idli", 20, 10), item("Vada", 15, 10)]);
    let bookings = bookings(&store);
    let diner = enroll(&store);

    for meal in &["Idli", "Idli", "Vada"] {
        bookings.execute(BookMeal {
            menu_id,
            meal_name: meal.to_string(),
            diner_id: Some(diner.id()),
        })?;
    }

    let totals = ledger(&store).query(ItemTotals { date: today() })?;
    assert_eq!(
        hashmap! {
            "Idli".to_string() => 2,
            "Vada".to_string() => 1,
        },
        totals
    );
    Ok(())
}

#[test]
fn admin_credentials_verify_without_storing_the_plaintext() -> Result<()> {
    let store = store("admin_credentials_verify_without_storing_the_plaintext")?;
    let directory = AdminDirectory::new(store.pool.clone())?;

    directory.execute(RegisterAdmin {
        email: "cook@example.org".to_string(),
        password: "correct horse".to_string(),
    })?;

    assert!(directory.query(VerifyAdmin {
        email: "cook@example.org".to_string(),
        password: "correct horse".to_string(),
    })?);
    assert!(!directory.query(VerifyAdmin {
        email: "cook@example.org".to_string(),
        password: "wrong horse".to_string(),
    })?);
    assert!(!directory.query(VerifyAdmin {
        email: "stranger@example.org".to_string(),
        password: "correct horse".to_string(),
    })?);

    let docs = store.pool.get()?;
    let admins = docs.load_all::<Admin>()?;
    assert_eq!(1, admins.len());
    assert_ne!("correct horse", admins[0].password_hash);
    assert!(admins[0].password_hash.starts_with("$argon2"));
    Ok(())
}

#[test]
fn the_catalog_form_edits_in_place() -> Result<()> {
    let store = store("the_catalog_form_edits_in_place")?;
    let catalog = Catalog::new(store.pool.clone())?;

    let id = catalog.execute(SubmitItem {
        form: ItemForm {
            mode: FormMode::Creating,
            name: "Idli".to_string(),
            price: Decimal::from(20),
            description: None,
        },
    })?;

    let edited = catalog.execute(SubmitItem {
        form: ItemForm {
            mode: FormMode::Editing(id),
            name: "Idli".to_string(),
            price: Decimal::from(25),
            description: Some("Steamed, four to a plate".to_string()),
        },
    })?;
    assert_eq!(id, edited);

    let items: Vec<CatalogItem> = catalog.query(ListItems)?;
    assert_eq!(1, items.len());
    assert_eq!(Decimal::from(25), items[0].price);
    assert_eq!(
        Some("Steamed, four to a plate".to_string()),
        items[0].description
    );
    Ok(())
}

#[test]
fn the_whole_place_boots_from_a_config_file() -> Result<()> {
    env_logger::try_init().unwrap_or_default();
    let dir = tempfile::tempdir()?;
    let config = crate::config::Config {
        db: crate::config::StoreConfig {
            path: dir.path().join("store"),
        },
    };

    let canteen = crate::Canteen::new(&config)?;
    canteen.setup()?;

    let diner = canteen.enroll_diner()?;
    let menus = canteen.menus()?;
    let menu_id = menus.execute(ScheduleMenu {
        draft: draft(today(), &[item("Idli", 20, 1)]),
    })?;
    menus.execute(ActivateMenu { menu_id })?;

    let issued = canteen.bookings()?.execute(BookMeal {
        menu_id,
        meal_name: "Idli".to_string(),
        diner_id: Some(diner.id()),
    })?;
    assert_eq!("TOKEN-1", issued.token);
    Ok(())
}
