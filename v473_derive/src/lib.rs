use proc_macro::TokenStream;
use quote::quote;
use syn::{parse, parse_macro_input, DeriveInput};

#[proc_macro_derive(WordSerde)]
/// Derived on a packed_struct to shim in our word serde methods on packed register layouts
pub fn derive_word_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let reg_name = input.ident;
    let generated = quote! {
        impl Serialize for #reg_name {
            type Chunk = <Self as PackedStruct>::ByteArray;

            fn serialize(&self) -> Self::Chunk {
                self.pack().expect("Packing a register layout can't fail")
            }
        }

        impl Deserialize for #reg_name {
            type Chunk = <Self as PackedStruct>::ByteArray;

            fn deserialize(chunk: Self::Chunk) -> Result<Self, crate::transport::Error> {
                Ok(Self::unpack(&chunk)?)
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attaches a register byte offset (from the card's base address) to a register layout
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let num = match parse::<syn::Lit>(attr).expect("Error parsing attribute") {
        syn::Lit::Int(v) => v,
        _ => panic!("The address must be a literal integer"),
    };
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.clone().ident;

    let generated = quote! {
        impl Address for #ident {
            fn addr() -> usize {
                #num as usize
            }
        }
        #item
    };
    TokenStream::from(generated)
}
