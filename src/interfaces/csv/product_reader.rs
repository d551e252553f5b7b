use crate::domain::product::Product;
use crate::error::{Result, ServiceError};
use std::io::Read;

/// Reads catalog products from a CSV source with the header
/// `id,title,price,number_in_stock`.
///
/// Whitespace is trimmed and short records are accepted, so the stock column
/// may be left out or empty.
pub struct ProductReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ProductReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes products, one result per record.
    pub fn products(self) -> impl Iterator<Item = Result<Product>> {
        self.reader.into_deserialize().map(|result| {
            let product: Product = result.map_err(ServiceError::from)?;
            if product.price.value().is_sign_negative() {
                return Err(ServiceError::Validation(format!(
                    "product {} has a negative price",
                    product.id
                )));
            }
            Ok(product)
        })
    }
}
