//! Typed round trip: write orders with per-field formats, read them back

use chrono::NaiveDate;
use excelmap::{
    AppKind, ErrorPolicy, ExcelRow, FieldDescriptor, Flow, HolderConfig, MemoryProfile, ReadSheet,
    Record, Result, Schema, WriteSheet,
};

#[derive(Debug)]
struct Order {
    id: i64,
    customer: String,
    total: f64,
    placed: NaiveDate,
}

impl ExcelRow for Order {
    fn schema() -> Schema {
        Schema::new(vec![
            FieldDescriptor::new("id", AppKind::Integer).header("Order"),
            FieldDescriptor::new("customer", AppKind::Text).header("Customer"),
            FieldDescriptor::new("total", AppKind::Float).header("Total"),
            FieldDescriptor::new("placed", AppKind::Date).header("Placed"),
        ])
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Order {
            id: record.take("id")?,
            customer: record.take("customer")?,
            total: record.take("total")?,
            placed: record.take("placed")?,
        })
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("customer", self.customer.as_str())
            .with("total", self.total)
            .with("placed", self.placed)
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let path = "demos/orders.xlsx";
    println!("Writing orders to {}...", path);

    // MEMORY_LIMIT_MB picks the flush batch size
    let mut writer = excelmap::write::<Order>(path)
        .with_memory_profile(MemoryProfile::from_env())
        .build()?;
    writer.sheet("Orders")?;
    for i in 0..1_000 {
        writer.write_row(&Order {
            id: i,
            customer: format!("Customer {}", i % 37),
            total: (i as f64) * 12.5,
            placed: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i as u64 % 365),
        })?;
    }
    // Dates as text on the second sheet
    writer.sheet(WriteSheet::new("Export").config(HolderConfig::new().format("%d.%m.%Y")))?;
    writer.write_row(&Order {
        id: 1,
        customer: "Alice".to_string(),
        total: 99.0,
        placed: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
    })?;
    writer.finish()?;

    let mut reader = excelmap::read::<Order>(path)
        .with_error_policy(ErrorPolicy::SkipRow)
        .build()?;
    println!("Sheets: {:?}", reader.sheet_names());

    let mut revenue = 0.0;
    let summary = reader.read_sheet("Orders", &mut |order: Order| {
        revenue += order.total;
        Ok(Flow::Continue)
    })?;
    println!("Read {} orders, revenue {:.2}", summary.rows, revenue);

    for order in reader.rows(ReadSheet::name("Export").config(HolderConfig::new().format("%d.%m.%Y")))? {
        println!("{:?}", order?);
    }
    reader.finish()?;
    Ok(())
}
